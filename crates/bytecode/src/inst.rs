mod util;

use enum_ordinalize::Ordinalize;

pub use util::*;

/// The shape of operands that follow an opcode in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// A single unsigned byte, e.g. a stack slot or an argument count.
    Byte,
    /// A single byte indexing the constant pool.
    Const,
    /// A big-endian `u16` forward offset.
    Jump,
    /// A big-endian `u16` backward offset.
    Loop,
    /// A constant index followed by an argument count.
    Invoke,
    /// A constant index pointing at a function, followed by one `(is_local, index)` byte pair
    /// per upvalue of that function.
    Closure,
}

macro_rules! define_inst {
    (
        $(#[$meta:meta])*
        // type names
        $ty_vis:vis $type:ident,
        // instruction variant definition
        $(
            // metadata for this variant. Will be put inside the final enum
            $(#[$variant_meta:meta])*
            // variant name
            $name:ident
            // params
            $(($param_name:ident : $param:ident))?
        ),*
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Copy, Ordinalize)]
        #[repr(u8)]
        $ty_vis enum $type {$(
            $(#[$variant_meta])*
            $name
        ),*}

        impl $type {
            /// Returns the type of parameters of this instruction
            pub fn param_type(self) -> Option<ParamType> {
                #[allow(path_statements)]
                match self {$(
                    $type::$name => {
                        None::<ParamType>
                        $(; Some(ParamType::$param))?
                    }
                ),*
                }
            }
        }

        impl ::std::fmt::Display for $type {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {$(
                    Self::$name => {
                        f.pad(stringify!($name))?;
                    }
                )*}
                Ok(())
            }
        }
    };
}

// instruction definition.
//
// Each line is an instruction with its operand shape in parentheses. Operands
// are raw bytes following the opcode; jump offsets are big-endian `u16`s.
define_inst! {
    /// The list of instructions understood by the virtual machine.
    pub Inst,

    // constants
    /// Push the `idx`th constant of the current chunk
    Constant(idx: Const),
    /// Push nil
    Nil,
    /// Push boolean true
    True,
    /// Push boolean false
    False,

    // stack manipulation
    /// Pop a value from stack
    Pop,

    // load/stores
    /// Push the value in the `slot`th local slot of the current frame
    GetLocal(slot: Byte),
    /// Store the stack top into the `slot`th local slot, leaving it on stack
    SetLocal(slot: Byte),
    /// Push the global named by the `idx`th constant
    GetGlobal(idx: Const),
    /// Pop the stack top into a (possibly new) global named by the `idx`th constant
    DefineGlobal(idx: Const),
    /// Store the stack top into an existing global, leaving it on stack
    SetGlobal(idx: Const),
    /// Push the value behind the `slot`th upvalue of the running closure
    GetUpvalue(slot: Byte),
    /// Store the stack top through the `slot`th upvalue, leaving it on stack
    SetUpvalue(slot: Byte),

    // fields
    /// Replace the instance at stack top with its field or bound method named by `idx`
    GetProperty(idx: Const),
    /// Pops `[instance, value]`, stores the field and pushes `value`
    SetProperty(idx: Const),
    /// Pops `[this, superclass]`, pushes the superclass method bound to `this`
    GetSuper(idx: Const),

    // arithmetic
    Equal,
    Greater,
    Less,
    /// Add two numbers or concatenate two strings
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,

    /// Pop and print the stack top, followed by a newline
    Print,

    // control flow
    /// Jump forward unconditionally
    Jump(offset: Jump),
    /// Jump forward if the stack top is _falsy_. The condition is not popped.
    JumpIfFalse(offset: Jump),
    /// Jump backward unconditionally
    Loop(offset: Loop),

    // function
    /// Call a function. The argument stack contains first the callee, and then the
    /// `n_args` arguments to be passed into it.
    ///
    /// The stack before and after call looks like this:
    ///
    /// ```plaintext
    /// (stack bottom) ..., func, arg0, arg1, ..., argN (stack top)
    ///                    |-----> These values are popped
    ///                    |<-- This value is pushed
    /// (stack bottom) ..., result (stack top)
    /// ```
    Call(n_args: Byte),
    /// Call the method named by the constant operand on the receiver below the arguments,
    /// without materializing a bound method.
    Invoke(method: Invoke),
    /// Like [`Inst::Invoke`], but looks the method up on the superclass popped from stack top.
    SuperInvoke(method: Invoke),
    /// Create a closure from the function constant and capture its upvalues
    Closure(func: Closure),
    /// Hoist the stack top into its upvalue (if any) and pop it
    CloseUpvalue,
    /// Return the current function with the stack top as result
    Return,

    // classes
    /// Push a new class named by the `idx`th constant
    Class(idx: Const),
    /// Pops `[superclass, subclass]`, copying every method of superclass into subclass.
    /// Leaves the superclass on stack.
    Inherit,
    /// Pops a closure and binds it as method `idx` of the class below it
    Method(idx: Const)
}

impl Inst {
    /// Decode an opcode byte.
    pub fn decode(byte: u8) -> Option<Inst> {
        Inst::from_ordinal(byte)
    }
}
