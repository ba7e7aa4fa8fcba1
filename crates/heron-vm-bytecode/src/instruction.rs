//! Bytecode instructions (opcodes)

use serde::{Deserialize, Serialize};

use crate::operand::Operand;

macro_rules! opcodes {
    ($( $(#[$attr:meta])* $name:ident = $byte:literal [$($operand:ident),*], )*) => {
        /// Bytecode opcodes
        ///
        /// Stack-based instruction set. Each opcode is followed by the operands
        /// listed in [`Opcode::operands`], nothing else.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Opcode {
            $( $(#[$attr])* $name = $byte, )*
        }

        impl Opcode {
            /// Convert from raw byte
            pub const fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $byte => Some(Self::$name), )*
                    _ => None,
                }
            }

            /// Get the name of this opcode
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name), )*
                }
            }

            /// Operand layout following the opcode byte
            pub const fn operands(self) -> &'static [Operand] {
                match self {
                    $( Self::$name => &[$(Operand::$operand),*], )*
                }
            }
        }
    };
}

opcodes! {
    // ==================== Literals ====================
    /// Push undefined
    Undefined = 0x00 [],
    /// Push null
    Null = 0x01 [],
    /// Push true
    True = 0x02 [],
    /// Push false
    False = 0x03 [],
    /// Push the number 0
    Zero = 0x04 [],
    /// Push the number 1
    One = 0x05 [],
    /// Push an inline 16-bit integer (internal)
    Short = 0x06 [I16],
    /// Push an inline 32-bit integer (internal)
    Int = 0x07 [I32],
    /// Push numbers\[idx\]
    Number = 0x08 [Number],
    /// Push strings\[idx\]
    String = 0x09 [String],
    /// Push the frame's `this`
    This = 0x0A [],
    /// Push a new regular expression object for regexps\[idx\]
    RegExp = 0x0B [RegExp],
    /// Push a closure over functions\[idx\] capturing the current scope
    Closure = 0x0C [Function],

    // ==================== Stack ====================
    /// Discard the top value
    Pop = 0x10 [],
    /// Pop the top value into the frame's result register
    PopResult = 0x11 [],
    /// Duplicate the top value
    Dup = 0x12 [],
    /// Duplicate the top two values
    Dup2 = 0x13 [],
    /// Swap the top two values
    Swap = 0x14 [],

    // ==================== Slots ====================
    /// Push variables\[n\]
    GetVar = 0x18 [U16],
    /// variables\[n\] = top (value stays on the stack)
    SetVar = 0x19 [U16],
    /// Increment/decrement variables\[n\], push the result
    VarIncDec = 0x1A [U16, U8],
    /// Push the value held in temporaries\[n\]
    LoadTemp = 0x1B [U16],
    /// Pop into temporaries\[n\]
    StoreTemp = 0x1C [U16],

    // ==================== Names ====================
    /// Push the value bound to a name on the scope chain
    Name = 0x20 [String],
    /// Push the scope object that binds a name (global when unbound)
    BindName = 0x21 [String],
    /// \[scope, value\] -> \[value\], storing value under the name
    SetName = 0x22 [String],
    /// Push the value bound to a name and the `this` for calling it
    NameAndThis = 0x23 [String],
    /// typeof name, without a ReferenceError for unbound names
    TypeOfName = 0x24 [String],
    /// Increment/decrement a name binding, push the result
    NameIncDec = 0x25 [String, U8],

    // ==================== Properties ====================
    /// \[obj\] -> \[obj.name\]
    GetProp = 0x28 [String],
    /// \[obj, value\] -> \[value\], storing obj.name = value
    SetProp = 0x29 [String],
    /// \[obj, key\] -> \[obj\[key\]\]
    GetElem = 0x2A [],
    /// \[obj, key, value\] -> \[value\]
    SetElem = 0x2B [],
    /// \[obj, key\] -> \[delete obj\[key\]\]
    DelProp = 0x2C [],
    /// Increment/decrement obj.name, \[obj\] -> \[result\]
    PropIncDec = 0x2D [String, U8],
    /// Increment/decrement obj\[key\], \[obj, key\] -> \[result\]
    ElemIncDec = 0x2E [U8],
    /// Pop n values into a new array
    NewArray = 0x2F [U16],
    /// Push a new empty object
    NewObject = 0x30 [],

    // ==================== Arithmetic ====================
    /// Addition or string concatenation
    Add = 0x38 [],
    /// Subtraction
    Sub = 0x39 [],
    /// Multiplication
    Mul = 0x3A [],
    /// Division
    Div = 0x3B [],
    /// Remainder
    Mod = 0x3C [],
    /// Unary negation
    Neg = 0x3D [],
    /// Unary plus (ToNumber)
    Pos = 0x3E [],
    /// Bitwise NOT
    BitNot = 0x3F [],
    /// Bitwise AND
    BitAnd = 0x40 [],
    /// Bitwise OR
    BitOr = 0x41 [],
    /// Bitwise XOR
    BitXor = 0x42 [],
    /// Left shift
    Shl = 0x43 [],
    /// Signed right shift
    Shr = 0x44 [],
    /// Unsigned right shift
    Ushr = 0x45 [],
    /// Logical NOT
    Not = 0x46 [],

    // ==================== Comparison ====================
    /// Abstract equality
    Eq = 0x48 [],
    /// Abstract inequality
    Ne = 0x49 [],
    /// Strict equality
    StrictEq = 0x4A [],
    /// Strict inequality
    StrictNe = 0x4B [],
    /// Less than
    Lt = 0x4C [],
    /// Less than or equal
    Le = 0x4D [],
    /// Greater than
    Gt = 0x4E [],
    /// Greater than or equal
    Ge = 0x4F [],
    /// `key in obj`
    In = 0x50 [],
    /// `value instanceof ctor`
    InstanceOf = 0x51 [],
    /// typeof value
    TypeOf = 0x52 [],

    // ==================== Control Flow ====================
    /// Unconditional jump
    Goto = 0x58 [Jump],
    /// Pop, jump if truthy
    IfTrue = 0x59 [Jump],
    /// Pop, jump if falsy
    IfFalse = 0x5A [Jump],
    /// Save the return position in temporaries\[n\] and jump to a finally body
    Gosub = 0x5B [Jump, U16],
    /// Jump to the return position saved in temporaries\[n\]
    RetSub = 0x5C [U16],

    // ==================== Scope ====================
    /// Pop an object and push it on the scope chain
    EnterWith = 0x60 [],
    /// Pop the innermost `with` scope
    LeaveWith = 0x61 [],
    /// Pop an object, store its property enumerator in temporaries\[n\]
    EnumInit = 0x62 [U16],
    /// Advance the enumerator, push whether a key is available
    EnumNext = 0x63 [U16],
    /// Push the enumerator's current key
    EnumId = 0x64 [U16],

    // ==================== Calls ====================
    /// \[fn, this, args...\] -> \[result\]
    Call = 0x68 [U16, String],
    /// \[ctor, args...\] -> \[object\]
    New = 0x69 [U16, String],
    /// Pop and return the top value
    Return = 0x6A [],

    // ==================== Exceptions ====================
    /// Enter a try region with catch and finally offsets (0 = absent)
    Try = 0x70 [Jump, Jump],
    /// Leave the innermost try region normally
    EndTry = 0x71 [],
    /// Pop and throw
    Throw = 0x72 [],
    /// Rethrow the exception saved in temporaries\[n\]
    Rethrow = 0x73 [U16],

    // ==================== Internal ====================
    /// Source line marker (internal); lines past 65535 are recorded as 65535
    Line = 0xF0 [U16],
    /// Implicit `return undefined` at the end of a function body (internal)
    ReturnUndefined = 0xF1 [],
    /// End of the instruction stream (internal)
    End = 0xF2 [],
}

/// Flag bit of `*IncDec` operands: decrement instead of increment
pub const INCDEC_DECREMENT: u8 = 0x01;
/// Flag bit of `*IncDec` operands: push the old value (postfix form)
pub const INCDEC_POSTFIX: u8 = 0x02;

impl Opcode {
    /// Convert to raw byte
    #[inline]
    pub const fn to_byte(self) -> u8 {
        self as u8
    }

    /// Encoded length of the instruction, opcode byte included
    pub const fn length(self) -> usize {
        let operands = self.operands();
        let mut len = 1;
        let mut i = 0;
        while i < operands.len() {
            len += operands[i].width();
            i += 1;
        }
        len
    }

    /// Whether the opcode is part of the introspectable instruction set.
    ///
    /// Line markers, inline integer literals, the implicit return and the
    /// end-of-stream marker are internal.
    pub const fn is_public(self) -> bool {
        !matches!(
            self,
            Self::Short | Self::Int | Self::Line | Self::ReturnUndefined | Self::End
        )
    }

    /// Whether execution can fall through to the next instruction
    pub const fn falls_through(self) -> bool {
        !matches!(
            self,
            Self::Goto
                | Self::RetSub
                | Self::Return
                | Self::ReturnUndefined
                | Self::End
                | Self::Throw
                | Self::Rethrow
        )
    }

    /// Values popped and pushed by the instruction.
    ///
    /// `count` is the instruction's first `U16` operand; it only matters for
    /// `NewArray`, `Call` and `New`.
    pub const fn stack_effect(self, count: u16) -> (u32, u32) {
        let count = count as u32;
        match self {
            Self::Undefined
            | Self::Null
            | Self::True
            | Self::False
            | Self::Zero
            | Self::One
            | Self::Short
            | Self::Int
            | Self::Number
            | Self::String
            | Self::This
            | Self::RegExp
            | Self::Closure
            | Self::GetVar
            | Self::VarIncDec
            | Self::LoadTemp
            | Self::Name
            | Self::BindName
            | Self::TypeOfName
            | Self::NameIncDec
            | Self::NewObject
            | Self::EnumNext
            | Self::EnumId => (0, 1),

            Self::NameAndThis => (0, 2),

            Self::Pop
            | Self::PopResult
            | Self::StoreTemp
            | Self::IfTrue
            | Self::IfFalse
            | Self::EnterWith
            | Self::EnumInit
            | Self::Return
            | Self::Throw => (1, 0),

            Self::Dup => (1, 2),
            Self::Dup2 => (2, 4),
            Self::Swap => (2, 2),

            Self::SetVar
            | Self::GetProp
            | Self::PropIncDec
            | Self::Neg
            | Self::Pos
            | Self::BitNot
            | Self::Not
            | Self::TypeOf => (1, 1),

            Self::SetName
            | Self::SetProp
            | Self::GetElem
            | Self::DelProp
            | Self::ElemIncDec
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::BitAnd
            | Self::BitOr
            | Self::BitXor
            | Self::Shl
            | Self::Shr
            | Self::Ushr
            | Self::Eq
            | Self::Ne
            | Self::StrictEq
            | Self::StrictNe
            | Self::Lt
            | Self::Le
            | Self::Gt
            | Self::Ge
            | Self::In
            | Self::InstanceOf => (2, 1),

            Self::SetElem => (3, 1),
            Self::NewArray => (count, 1),
            Self::Call => (count + 2, 1),
            Self::New => (count + 1, 1),

            Self::Goto
            | Self::Gosub
            | Self::RetSub
            | Self::LeaveWith
            | Self::Try
            | Self::EndTry
            | Self::Rethrow
            | Self::Line
            | Self::ReturnUndefined
            | Self::End => (0, 0),
        }
    }
}
