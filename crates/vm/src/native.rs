//! Functions provided by the host.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;
use crate::vm::Vm;

/// Seconds since the Unix epoch.
pub fn clock(_args: &[Value]) -> Value {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64());
    Value::Number(now)
}

pub(crate) fn define_builtins(vm: &mut Vm) {
    vm.define_native("clock", 0, clock);
}
