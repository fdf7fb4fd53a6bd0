//! The CIL opcode set (ECMA-335 Partition III).
//!
//! Every opcode is a variant of [`OpCode`]. Its static description (encoding bytes,
//! mnemonic, operand type, stack effect and control flow kind) lives in a single table
//! generated next to the enum so the two can never drift apart.
//!
//! Two-byte opcodes share the [`FE_PREFIX`] first byte and list their second byte as
//! `code`; single-byte opcodes have a `prefix` of zero.
//!
//! ```rust
//! use ilsplice::assembly::{OpCode, OperandType};
//!
//! let op = OpCode::from_bytes(0xFE, 0x01).unwrap();
//! assert_eq!(op, OpCode::Ceq);
//! assert_eq!(op.mnemonic(), "ceq");
//! assert_eq!(OpCode::BrS.long_form(), OpCode::Br);
//! assert_eq!(OpCode::from_mnemonic("stfld").unwrap().operand_type(), OperandType::Token);
//! ```

use std::{collections::HashMap, fmt, sync::OnceLock};

use strum::{EnumCount, EnumIter, IntoEnumIterator};

/// First byte of every two-byte opcode
pub const FE_PREFIX: u8 = 0xFE;

/// Kind of the inline operand following an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed byte (`ldc.i4.s`)
    Int8,
    /// Unsigned byte (`unaligned.`, `no.`)
    UInt8,
    /// 32-bit integer
    Int32,
    /// 64-bit integer
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Metadata token
    Token,
    /// Argument index as one byte
    ShortArgument,
    /// Argument index as two bytes
    Argument,
    /// Local index as one byte
    ShortLocal,
    /// Local index as two bytes
    Local,
    /// Signed byte branch displacement
    ShortBranch,
    /// Signed 32-bit branch displacement
    Branch,
    /// Count followed by that many 32-bit displacements
    Switch,
}

impl OperandType {
    /// Encoded size of the operand, `None` for the variable-length switch table
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8
            | OperandType::UInt8
            | OperandType::ShortArgument
            | OperandType::ShortLocal
            | OperandType::ShortBranch => Some(1),
            OperandType::Argument | OperandType::Local => Some(2),
            OperandType::Int32 | OperandType::Float32 | OperandType::Token | OperandType::Branch => {
                Some(4)
            }
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// How an opcode changes the depth of the evaluation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    /// Pops and pushes a fixed number of values
    Fixed(u8, u8),
    /// Depends on the called method's signature (`call`, `callvirt`)
    Call,
    /// Pops the constructor's parameters, pushes the new object
    NewObj,
    /// Pops the return value if the method has one
    Return,
    /// Empties the stack (`leave`, `endfinally`)
    Clear,
    /// Cannot be derived from the instruction alone (`calli`)
    Unknown,
}

/// Control flow kind of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Either the branch target or the next instruction
    ConditionalBranch,
    /// Always the branch target
    UnconditionalBranch,
    /// Calls a method and continues with the next instruction
    Call,
    /// Leaves the method
    Return,
    /// One of the switch targets or the next instruction
    Switch,
    /// Raises an exception
    Throw,
    /// Ends a finally, fault or filter block
    EndFinally,
    /// Leaves a protected region for the branch target
    Leave,
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCodeInfo {
    /// `0xFE` for two-byte opcodes, 0 otherwise
    pub prefix: u8,
    /// The opcode byte (second byte for two-byte opcodes)
    pub code: u8,
    /// Lower-case ECMA mnemonic
    pub mnemonic: &'static str,
    /// Inline operand kind
    pub operand: OperandType,
    /// Stack behaviour
    pub stack: StackEffect,
    /// Control flow kind
    pub flow: FlowType,
}

macro_rules! opcode_table {
    ($( $variant:ident = $prefix:literal $code:literal $mnemonic:literal $operand:ident [$($stack:tt)*] $flow:ident; )*) => {
        /// A CIL opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
        pub enum OpCode {
            $(
                #[doc = concat!("`", $mnemonic, "`")]
                $variant,
            )*
        }

        static OPCODE_INFO: [OpCodeInfo; OpCode::COUNT] = [
            $(
                OpCodeInfo {
                    prefix: $prefix,
                    code: $code,
                    mnemonic: $mnemonic,
                    operand: OperandType::$operand,
                    stack: StackEffect::$($stack)*,
                    flow: FlowType::$flow,
                },
            )*
        ];
    };
}

opcode_table! {
    Nop = 0x00 0x00 "nop" None [Fixed(0, 0)] Sequential;
    Break = 0x00 0x01 "break" None [Fixed(0, 0)] Sequential;
    Ldarg0 = 0x00 0x02 "ldarg.0" None [Fixed(0, 1)] Sequential;
    Ldarg1 = 0x00 0x03 "ldarg.1" None [Fixed(0, 1)] Sequential;
    Ldarg2 = 0x00 0x04 "ldarg.2" None [Fixed(0, 1)] Sequential;
    Ldarg3 = 0x00 0x05 "ldarg.3" None [Fixed(0, 1)] Sequential;
    Ldloc0 = 0x00 0x06 "ldloc.0" None [Fixed(0, 1)] Sequential;
    Ldloc1 = 0x00 0x07 "ldloc.1" None [Fixed(0, 1)] Sequential;
    Ldloc2 = 0x00 0x08 "ldloc.2" None [Fixed(0, 1)] Sequential;
    Ldloc3 = 0x00 0x09 "ldloc.3" None [Fixed(0, 1)] Sequential;
    Stloc0 = 0x00 0x0A "stloc.0" None [Fixed(1, 0)] Sequential;
    Stloc1 = 0x00 0x0B "stloc.1" None [Fixed(1, 0)] Sequential;
    Stloc2 = 0x00 0x0C "stloc.2" None [Fixed(1, 0)] Sequential;
    Stloc3 = 0x00 0x0D "stloc.3" None [Fixed(1, 0)] Sequential;
    LdargS = 0x00 0x0E "ldarg.s" ShortArgument [Fixed(0, 1)] Sequential;
    LdargaS = 0x00 0x0F "ldarga.s" ShortArgument [Fixed(0, 1)] Sequential;
    StargS = 0x00 0x10 "starg.s" ShortArgument [Fixed(1, 0)] Sequential;
    LdlocS = 0x00 0x11 "ldloc.s" ShortLocal [Fixed(0, 1)] Sequential;
    LdlocaS = 0x00 0x12 "ldloca.s" ShortLocal [Fixed(0, 1)] Sequential;
    StlocS = 0x00 0x13 "stloc.s" ShortLocal [Fixed(1, 0)] Sequential;
    Ldnull = 0x00 0x14 "ldnull" None [Fixed(0, 1)] Sequential;
    LdcI4M1 = 0x00 0x15 "ldc.i4.m1" None [Fixed(0, 1)] Sequential;
    LdcI40 = 0x00 0x16 "ldc.i4.0" None [Fixed(0, 1)] Sequential;
    LdcI41 = 0x00 0x17 "ldc.i4.1" None [Fixed(0, 1)] Sequential;
    LdcI42 = 0x00 0x18 "ldc.i4.2" None [Fixed(0, 1)] Sequential;
    LdcI43 = 0x00 0x19 "ldc.i4.3" None [Fixed(0, 1)] Sequential;
    LdcI44 = 0x00 0x1A "ldc.i4.4" None [Fixed(0, 1)] Sequential;
    LdcI45 = 0x00 0x1B "ldc.i4.5" None [Fixed(0, 1)] Sequential;
    LdcI46 = 0x00 0x1C "ldc.i4.6" None [Fixed(0, 1)] Sequential;
    LdcI47 = 0x00 0x1D "ldc.i4.7" None [Fixed(0, 1)] Sequential;
    LdcI48 = 0x00 0x1E "ldc.i4.8" None [Fixed(0, 1)] Sequential;
    LdcI4S = 0x00 0x1F "ldc.i4.s" Int8 [Fixed(0, 1)] Sequential;
    LdcI4 = 0x00 0x20 "ldc.i4" Int32 [Fixed(0, 1)] Sequential;
    LdcI8 = 0x00 0x21 "ldc.i8" Int64 [Fixed(0, 1)] Sequential;
    LdcR4 = 0x00 0x22 "ldc.r4" Float32 [Fixed(0, 1)] Sequential;
    LdcR8 = 0x00 0x23 "ldc.r8" Float64 [Fixed(0, 1)] Sequential;
    Dup = 0x00 0x25 "dup" None [Fixed(1, 2)] Sequential;
    Pop = 0x00 0x26 "pop" None [Fixed(1, 0)] Sequential;
    Jmp = 0x00 0x27 "jmp" Token [Fixed(0, 0)] Return;
    Call = 0x00 0x28 "call" Token [Call] Call;
    Calli = 0x00 0x29 "calli" Token [Unknown] Call;
    Ret = 0x00 0x2A "ret" None [Return] Return;
    BrS = 0x00 0x2B "br.s" ShortBranch [Fixed(0, 0)] UnconditionalBranch;
    BrfalseS = 0x00 0x2C "brfalse.s" ShortBranch [Fixed(1, 0)] ConditionalBranch;
    BrtrueS = 0x00 0x2D "brtrue.s" ShortBranch [Fixed(1, 0)] ConditionalBranch;
    BeqS = 0x00 0x2E "beq.s" ShortBranch [Fixed(2, 0)] ConditionalBranch;
    BgeS = 0x00 0x2F "bge.s" ShortBranch [Fixed(2, 0)] ConditionalBranch;
    BgtS = 0x00 0x30 "bgt.s" ShortBranch [Fixed(2, 0)] ConditionalBranch;
    BleS = 0x00 0x31 "ble.s" ShortBranch [Fixed(2, 0)] ConditionalBranch;
    BltS = 0x00 0x32 "blt.s" ShortBranch [Fixed(2, 0)] ConditionalBranch;
    BneUnS = 0x00 0x33 "bne.un.s" ShortBranch [Fixed(2, 0)] ConditionalBranch;
    BgeUnS = 0x00 0x34 "bge.un.s" ShortBranch [Fixed(2, 0)] ConditionalBranch;
    BgtUnS = 0x00 0x35 "bgt.un.s" ShortBranch [Fixed(2, 0)] ConditionalBranch;
    BleUnS = 0x00 0x36 "ble.un.s" ShortBranch [Fixed(2, 0)] ConditionalBranch;
    BltUnS = 0x00 0x37 "blt.un.s" ShortBranch [Fixed(2, 0)] ConditionalBranch;
    Br = 0x00 0x38 "br" Branch [Fixed(0, 0)] UnconditionalBranch;
    Brfalse = 0x00 0x39 "brfalse" Branch [Fixed(1, 0)] ConditionalBranch;
    Brtrue = 0x00 0x3A "brtrue" Branch [Fixed(1, 0)] ConditionalBranch;
    Beq = 0x00 0x3B "beq" Branch [Fixed(2, 0)] ConditionalBranch;
    Bge = 0x00 0x3C "bge" Branch [Fixed(2, 0)] ConditionalBranch;
    Bgt = 0x00 0x3D "bgt" Branch [Fixed(2, 0)] ConditionalBranch;
    Ble = 0x00 0x3E "ble" Branch [Fixed(2, 0)] ConditionalBranch;
    Blt = 0x00 0x3F "blt" Branch [Fixed(2, 0)] ConditionalBranch;
    BneUn = 0x00 0x40 "bne.un" Branch [Fixed(2, 0)] ConditionalBranch;
    BgeUn = 0x00 0x41 "bge.un" Branch [Fixed(2, 0)] ConditionalBranch;
    BgtUn = 0x00 0x42 "bgt.un" Branch [Fixed(2, 0)] ConditionalBranch;
    BleUn = 0x00 0x43 "ble.un" Branch [Fixed(2, 0)] ConditionalBranch;
    BltUn = 0x00 0x44 "blt.un" Branch [Fixed(2, 0)] ConditionalBranch;
    Switch = 0x00 0x45 "switch" Switch [Fixed(1, 0)] Switch;
    LdindI1 = 0x00 0x46 "ldind.i1" None [Fixed(1, 1)] Sequential;
    LdindU1 = 0x00 0x47 "ldind.u1" None [Fixed(1, 1)] Sequential;
    LdindI2 = 0x00 0x48 "ldind.i2" None [Fixed(1, 1)] Sequential;
    LdindU2 = 0x00 0x49 "ldind.u2" None [Fixed(1, 1)] Sequential;
    LdindI4 = 0x00 0x4A "ldind.i4" None [Fixed(1, 1)] Sequential;
    LdindU4 = 0x00 0x4B "ldind.u4" None [Fixed(1, 1)] Sequential;
    LdindI8 = 0x00 0x4C "ldind.i8" None [Fixed(1, 1)] Sequential;
    LdindI = 0x00 0x4D "ldind.i" None [Fixed(1, 1)] Sequential;
    LdindR4 = 0x00 0x4E "ldind.r4" None [Fixed(1, 1)] Sequential;
    LdindR8 = 0x00 0x4F "ldind.r8" None [Fixed(1, 1)] Sequential;
    LdindRef = 0x00 0x50 "ldind.ref" None [Fixed(1, 1)] Sequential;
    StindRef = 0x00 0x51 "stind.ref" None [Fixed(2, 0)] Sequential;
    StindI1 = 0x00 0x52 "stind.i1" None [Fixed(2, 0)] Sequential;
    StindI2 = 0x00 0x53 "stind.i2" None [Fixed(2, 0)] Sequential;
    StindI4 = 0x00 0x54 "stind.i4" None [Fixed(2, 0)] Sequential;
    StindI8 = 0x00 0x55 "stind.i8" None [Fixed(2, 0)] Sequential;
    StindR4 = 0x00 0x56 "stind.r4" None [Fixed(2, 0)] Sequential;
    StindR8 = 0x00 0x57 "stind.r8" None [Fixed(2, 0)] Sequential;
    Add = 0x00 0x58 "add" None [Fixed(2, 1)] Sequential;
    Sub = 0x00 0x59 "sub" None [Fixed(2, 1)] Sequential;
    Mul = 0x00 0x5A "mul" None [Fixed(2, 1)] Sequential;
    Div = 0x00 0x5B "div" None [Fixed(2, 1)] Sequential;
    DivUn = 0x00 0x5C "div.un" None [Fixed(2, 1)] Sequential;
    Rem = 0x00 0x5D "rem" None [Fixed(2, 1)] Sequential;
    RemUn = 0x00 0x5E "rem.un" None [Fixed(2, 1)] Sequential;
    And = 0x00 0x5F "and" None [Fixed(2, 1)] Sequential;
    Or = 0x00 0x60 "or" None [Fixed(2, 1)] Sequential;
    Xor = 0x00 0x61 "xor" None [Fixed(2, 1)] Sequential;
    Shl = 0x00 0x62 "shl" None [Fixed(2, 1)] Sequential;
    Shr = 0x00 0x63 "shr" None [Fixed(2, 1)] Sequential;
    ShrUn = 0x00 0x64 "shr.un" None [Fixed(2, 1)] Sequential;
    Neg = 0x00 0x65 "neg" None [Fixed(1, 1)] Sequential;
    Not = 0x00 0x66 "not" None [Fixed(1, 1)] Sequential;
    ConvI1 = 0x00 0x67 "conv.i1" None [Fixed(1, 1)] Sequential;
    ConvI2 = 0x00 0x68 "conv.i2" None [Fixed(1, 1)] Sequential;
    ConvI4 = 0x00 0x69 "conv.i4" None [Fixed(1, 1)] Sequential;
    ConvI8 = 0x00 0x6A "conv.i8" None [Fixed(1, 1)] Sequential;
    ConvR4 = 0x00 0x6B "conv.r4" None [Fixed(1, 1)] Sequential;
    ConvR8 = 0x00 0x6C "conv.r8" None [Fixed(1, 1)] Sequential;
    ConvU4 = 0x00 0x6D "conv.u4" None [Fixed(1, 1)] Sequential;
    ConvU8 = 0x00 0x6E "conv.u8" None [Fixed(1, 1)] Sequential;
    Callvirt = 0x00 0x6F "callvirt" Token [Call] Call;
    Cpobj = 0x00 0x70 "cpobj" Token [Fixed(2, 0)] Sequential;
    Ldobj = 0x00 0x71 "ldobj" Token [Fixed(1, 1)] Sequential;
    Ldstr = 0x00 0x72 "ldstr" Token [Fixed(0, 1)] Sequential;
    Newobj = 0x00 0x73 "newobj" Token [NewObj] Call;
    Castclass = 0x00 0x74 "castclass" Token [Fixed(1, 1)] Sequential;
    Isinst = 0x00 0x75 "isinst" Token [Fixed(1, 1)] Sequential;
    ConvRUn = 0x00 0x76 "conv.r.un" None [Fixed(1, 1)] Sequential;
    Unbox = 0x00 0x79 "unbox" Token [Fixed(1, 1)] Sequential;
    Throw = 0x00 0x7A "throw" None [Fixed(1, 0)] Throw;
    Ldfld = 0x00 0x7B "ldfld" Token [Fixed(1, 1)] Sequential;
    Ldflda = 0x00 0x7C "ldflda" Token [Fixed(1, 1)] Sequential;
    Stfld = 0x00 0x7D "stfld" Token [Fixed(2, 0)] Sequential;
    Ldsfld = 0x00 0x7E "ldsfld" Token [Fixed(0, 1)] Sequential;
    Ldsflda = 0x00 0x7F "ldsflda" Token [Fixed(0, 1)] Sequential;
    Stsfld = 0x00 0x80 "stsfld" Token [Fixed(1, 0)] Sequential;
    Stobj = 0x00 0x81 "stobj" Token [Fixed(2, 0)] Sequential;
    ConvOvfI1Un = 0x00 0x82 "conv.ovf.i1.un" None [Fixed(1, 1)] Sequential;
    ConvOvfI2Un = 0x00 0x83 "conv.ovf.i2.un" None [Fixed(1, 1)] Sequential;
    ConvOvfI4Un = 0x00 0x84 "conv.ovf.i4.un" None [Fixed(1, 1)] Sequential;
    ConvOvfI8Un = 0x00 0x85 "conv.ovf.i8.un" None [Fixed(1, 1)] Sequential;
    ConvOvfU1Un = 0x00 0x86 "conv.ovf.u1.un" None [Fixed(1, 1)] Sequential;
    ConvOvfU2Un = 0x00 0x87 "conv.ovf.u2.un" None [Fixed(1, 1)] Sequential;
    ConvOvfU4Un = 0x00 0x88 "conv.ovf.u4.un" None [Fixed(1, 1)] Sequential;
    ConvOvfU8Un = 0x00 0x89 "conv.ovf.u8.un" None [Fixed(1, 1)] Sequential;
    ConvOvfIUn = 0x00 0x8A "conv.ovf.i.un" None [Fixed(1, 1)] Sequential;
    ConvOvfUUn = 0x00 0x8B "conv.ovf.u.un" None [Fixed(1, 1)] Sequential;
    Box = 0x00 0x8C "box" Token [Fixed(1, 1)] Sequential;
    Newarr = 0x00 0x8D "newarr" Token [Fixed(1, 1)] Sequential;
    Ldlen = 0x00 0x8E "ldlen" None [Fixed(1, 1)] Sequential;
    Ldelema = 0x00 0x8F "ldelema" Token [Fixed(2, 1)] Sequential;
    LdelemI1 = 0x00 0x90 "ldelem.i1" None [Fixed(2, 1)] Sequential;
    LdelemU1 = 0x00 0x91 "ldelem.u1" None [Fixed(2, 1)] Sequential;
    LdelemI2 = 0x00 0x92 "ldelem.i2" None [Fixed(2, 1)] Sequential;
    LdelemU2 = 0x00 0x93 "ldelem.u2" None [Fixed(2, 1)] Sequential;
    LdelemI4 = 0x00 0x94 "ldelem.i4" None [Fixed(2, 1)] Sequential;
    LdelemU4 = 0x00 0x95 "ldelem.u4" None [Fixed(2, 1)] Sequential;
    LdelemI8 = 0x00 0x96 "ldelem.i8" None [Fixed(2, 1)] Sequential;
    LdelemI = 0x00 0x97 "ldelem.i" None [Fixed(2, 1)] Sequential;
    LdelemR4 = 0x00 0x98 "ldelem.r4" None [Fixed(2, 1)] Sequential;
    LdelemR8 = 0x00 0x99 "ldelem.r8" None [Fixed(2, 1)] Sequential;
    LdelemRef = 0x00 0x9A "ldelem.ref" None [Fixed(2, 1)] Sequential;
    StelemI = 0x00 0x9B "stelem.i" None [Fixed(3, 0)] Sequential;
    StelemI1 = 0x00 0x9C "stelem.i1" None [Fixed(3, 0)] Sequential;
    StelemI2 = 0x00 0x9D "stelem.i2" None [Fixed(3, 0)] Sequential;
    StelemI4 = 0x00 0x9E "stelem.i4" None [Fixed(3, 0)] Sequential;
    StelemI8 = 0x00 0x9F "stelem.i8" None [Fixed(3, 0)] Sequential;
    StelemR4 = 0x00 0xA0 "stelem.r4" None [Fixed(3, 0)] Sequential;
    StelemR8 = 0x00 0xA1 "stelem.r8" None [Fixed(3, 0)] Sequential;
    StelemRef = 0x00 0xA2 "stelem.ref" None [Fixed(3, 0)] Sequential;
    Ldelem = 0x00 0xA3 "ldelem" Token [Fixed(2, 1)] Sequential;
    Stelem = 0x00 0xA4 "stelem" Token [Fixed(3, 0)] Sequential;
    UnboxAny = 0x00 0xA5 "unbox.any" Token [Fixed(1, 1)] Sequential;
    ConvOvfI1 = 0x00 0xB3 "conv.ovf.i1" None [Fixed(1, 1)] Sequential;
    ConvOvfU1 = 0x00 0xB4 "conv.ovf.u1" None [Fixed(1, 1)] Sequential;
    ConvOvfI2 = 0x00 0xB5 "conv.ovf.i2" None [Fixed(1, 1)] Sequential;
    ConvOvfU2 = 0x00 0xB6 "conv.ovf.u2" None [Fixed(1, 1)] Sequential;
    ConvOvfI4 = 0x00 0xB7 "conv.ovf.i4" None [Fixed(1, 1)] Sequential;
    ConvOvfU4 = 0x00 0xB8 "conv.ovf.u4" None [Fixed(1, 1)] Sequential;
    ConvOvfI8 = 0x00 0xB9 "conv.ovf.i8" None [Fixed(1, 1)] Sequential;
    ConvOvfU8 = 0x00 0xBA "conv.ovf.u8" None [Fixed(1, 1)] Sequential;
    Refanyval = 0x00 0xC2 "refanyval" Token [Fixed(1, 1)] Sequential;
    Ckfinite = 0x00 0xC3 "ckfinite" None [Fixed(1, 1)] Sequential;
    Mkrefany = 0x00 0xC6 "mkrefany" Token [Fixed(1, 1)] Sequential;
    Ldtoken = 0x00 0xD0 "ldtoken" Token [Fixed(0, 1)] Sequential;
    ConvU2 = 0x00 0xD1 "conv.u2" None [Fixed(1, 1)] Sequential;
    ConvU1 = 0x00 0xD2 "conv.u1" None [Fixed(1, 1)] Sequential;
    ConvI = 0x00 0xD3 "conv.i" None [Fixed(1, 1)] Sequential;
    ConvOvfI = 0x00 0xD4 "conv.ovf.i" None [Fixed(1, 1)] Sequential;
    ConvOvfU = 0x00 0xD5 "conv.ovf.u" None [Fixed(1, 1)] Sequential;
    AddOvf = 0x00 0xD6 "add.ovf" None [Fixed(2, 1)] Sequential;
    AddOvfUn = 0x00 0xD7 "add.ovf.un" None [Fixed(2, 1)] Sequential;
    MulOvf = 0x00 0xD8 "mul.ovf" None [Fixed(2, 1)] Sequential;
    MulOvfUn = 0x00 0xD9 "mul.ovf.un" None [Fixed(2, 1)] Sequential;
    SubOvf = 0x00 0xDA "sub.ovf" None [Fixed(2, 1)] Sequential;
    SubOvfUn = 0x00 0xDB "sub.ovf.un" None [Fixed(2, 1)] Sequential;
    Endfinally = 0x00 0xDC "endfinally" None [Clear] EndFinally;
    Leave = 0x00 0xDD "leave" Branch [Clear] Leave;
    LeaveS = 0x00 0xDE "leave.s" ShortBranch [Clear] Leave;
    StindI = 0x00 0xDF "stind.i" None [Fixed(2, 0)] Sequential;
    ConvU = 0x00 0xE0 "conv.u" None [Fixed(1, 1)] Sequential;
    Arglist = 0xFE 0x00 "arglist" None [Fixed(0, 1)] Sequential;
    Ceq = 0xFE 0x01 "ceq" None [Fixed(2, 1)] Sequential;
    Cgt = 0xFE 0x02 "cgt" None [Fixed(2, 1)] Sequential;
    CgtUn = 0xFE 0x03 "cgt.un" None [Fixed(2, 1)] Sequential;
    Clt = 0xFE 0x04 "clt" None [Fixed(2, 1)] Sequential;
    CltUn = 0xFE 0x05 "clt.un" None [Fixed(2, 1)] Sequential;
    Ldftn = 0xFE 0x06 "ldftn" Token [Fixed(0, 1)] Sequential;
    Ldvirtftn = 0xFE 0x07 "ldvirtftn" Token [Fixed(1, 1)] Sequential;
    Ldarg = 0xFE 0x09 "ldarg" Argument [Fixed(0, 1)] Sequential;
    Ldarga = 0xFE 0x0A "ldarga" Argument [Fixed(0, 1)] Sequential;
    Starg = 0xFE 0x0B "starg" Argument [Fixed(1, 0)] Sequential;
    Ldloc = 0xFE 0x0C "ldloc" Local [Fixed(0, 1)] Sequential;
    Ldloca = 0xFE 0x0D "ldloca" Local [Fixed(0, 1)] Sequential;
    Stloc = 0xFE 0x0E "stloc" Local [Fixed(1, 0)] Sequential;
    Localloc = 0xFE 0x0F "localloc" None [Fixed(1, 1)] Sequential;
    Endfilter = 0xFE 0x11 "endfilter" None [Fixed(1, 0)] EndFinally;
    Unaligned = 0xFE 0x12 "unaligned." UInt8 [Fixed(0, 0)] Sequential;
    Volatile = 0xFE 0x13 "volatile." None [Fixed(0, 0)] Sequential;
    Tail = 0xFE 0x14 "tail." None [Fixed(0, 0)] Sequential;
    Initobj = 0xFE 0x15 "initobj" Token [Fixed(1, 0)] Sequential;
    Constrained = 0xFE 0x16 "constrained." Token [Fixed(0, 0)] Sequential;
    Cpblk = 0xFE 0x17 "cpblk" None [Fixed(3, 0)] Sequential;
    Initblk = 0xFE 0x18 "initblk" None [Fixed(3, 0)] Sequential;
    No = 0xFE 0x19 "no." UInt8 [Fixed(0, 0)] Sequential;
    Rethrow = 0xFE 0x1A "rethrow" None [Fixed(0, 0)] Throw;
    Sizeof = 0xFE 0x1C "sizeof" Token [Fixed(0, 1)] Sequential;
    Refanytype = 0xFE 0x1D "refanytype" None [Fixed(1, 1)] Sequential;
    Readonly = 0xFE 0x1E "readonly." None [Fixed(0, 0)] Sequential;
}

type ByteTable = [Option<OpCode>; 256];

fn byte_tables() -> &'static (ByteTable, ByteTable) {
    static TABLES: OnceLock<(ByteTable, ByteTable)> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut single = [None; 256];
        let mut prefixed = [None; 256];
        for opcode in OpCode::iter() {
            let info = opcode.info();
            if info.prefix == FE_PREFIX {
                prefixed[usize::from(info.code)] = Some(opcode);
            } else {
                single[usize::from(info.code)] = Some(opcode);
            }
        }
        (single, prefixed)
    })
}

fn mnemonic_table() -> &'static HashMap<&'static str, OpCode> {
    static MNEMONICS: OnceLock<HashMap<&'static str, OpCode>> = OnceLock::new();
    MNEMONICS.get_or_init(|| OpCode::iter().map(|op| (op.mnemonic(), op)).collect())
}

impl OpCode {
    /// Static description of this opcode
    #[must_use]
    pub fn info(self) -> &'static OpCodeInfo {
        &OPCODE_INFO[self as usize]
    }

    /// Lower-case ECMA mnemonic
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    /// Inline operand kind
    #[must_use]
    pub fn operand_type(self) -> OperandType {
        self.info().operand
    }

    /// Stack behaviour
    #[must_use]
    pub fn stack_effect(self) -> StackEffect {
        self.info().stack
    }

    /// Control flow kind
    #[must_use]
    pub fn flow(self) -> FlowType {
        self.info().flow
    }

    /// Number of bytes the opcode itself occupies (1 or 2)
    #[must_use]
    pub fn encoded_len(self) -> usize {
        if self.info().prefix == FE_PREFIX {
            2
        } else {
            1
        }
    }

    /// Look up an opcode by its encoding. `prefix` is 0 for single-byte opcodes.
    #[must_use]
    pub fn from_bytes(prefix: u8, code: u8) -> Option<OpCode> {
        let (single, prefixed) = byte_tables();
        match prefix {
            0 => single[usize::from(code)],
            FE_PREFIX => prefixed[usize::from(code)],
            _ => None,
        }
    }

    /// Look up an opcode by mnemonic (`"ldc.i4.s"`, `"bne.un"`, ...)
    #[must_use]
    pub fn from_mnemonic(mnemonic: &str) -> Option<OpCode> {
        mnemonic_table().get(mnemonic).copied()
    }

    /// Returns true if the opcode carries a branch or switch operand
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(
            self.operand_type(),
            OperandType::ShortBranch | OperandType::Branch | OperandType::Switch
        )
    }

    /// The long (32-bit displacement) form of a short branch; other opcodes map to themselves
    #[must_use]
    pub fn long_form(self) -> OpCode {
        match self {
            OpCode::BrS => OpCode::Br,
            OpCode::BrfalseS => OpCode::Brfalse,
            OpCode::BrtrueS => OpCode::Brtrue,
            OpCode::BeqS => OpCode::Beq,
            OpCode::BgeS => OpCode::Bge,
            OpCode::BgtS => OpCode::Bgt,
            OpCode::BleS => OpCode::Ble,
            OpCode::BltS => OpCode::Blt,
            OpCode::BneUnS => OpCode::BneUn,
            OpCode::BgeUnS => OpCode::BgeUn,
            OpCode::BgtUnS => OpCode::BgtUn,
            OpCode::BleUnS => OpCode::BleUn,
            OpCode::BltUnS => OpCode::BltUn,
            OpCode::LeaveS => OpCode::Leave,
            other => other,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_enum_order() {
        assert_eq!(OPCODE_INFO.len(), OpCode::COUNT);
        for opcode in OpCode::iter() {
            let info = opcode.info();
            assert_eq!(OpCode::from_bytes(info.prefix, info.code), Some(opcode));
            assert_eq!(OpCode::from_mnemonic(info.mnemonic), Some(opcode));
        }
    }

    #[test]
    fn test_encodings() {
        assert_eq!(OpCode::from_bytes(0, 0x2A), Some(OpCode::Ret));
        assert_eq!(OpCode::from_bytes(0, 0x7D), Some(OpCode::Stfld));
        assert_eq!(OpCode::from_bytes(FE_PREFIX, 0x0C), Some(OpCode::Ldloc));
        assert_eq!(OpCode::Ldloc.encoded_len(), 2);
        assert_eq!(OpCode::Ldarg0.encoded_len(), 1);
    }

    #[test]
    fn test_reserved_bytes() {
        assert_eq!(OpCode::from_bytes(0, 0x24), None);
        assert_eq!(OpCode::from_bytes(0, 0xA6), None);
        assert_eq!(OpCode::from_bytes(FE_PREFIX, 0x08), None);
        assert_eq!(OpCode::from_bytes(0x01, 0x00), None);
    }

    #[test]
    fn test_branch_forms() {
        assert_eq!(OpCode::BneUnS.long_form(), OpCode::BneUn);
        assert_eq!(OpCode::LeaveS.long_form(), OpCode::Leave);
        assert_eq!(OpCode::BneUn.long_form(), OpCode::BneUn);
        assert!(OpCode::Switch.is_branch());
        assert!(!OpCode::Call.is_branch());
        assert_eq!(OpCode::BrS.flow(), FlowType::UnconditionalBranch);
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(OpCode::Stfld.stack_effect(), StackEffect::Fixed(2, 0));
        assert_eq!(OpCode::Sub.stack_effect(), StackEffect::Fixed(2, 1));
        assert_eq!(OpCode::Callvirt.stack_effect(), StackEffect::Call);
        assert_eq!(OpCode::Leave.stack_effect(), StackEffect::Clear);
        assert_eq!(OpCode::Ret.stack_effect(), StackEffect::Return);
    }

    #[test]
    fn test_operand_sizes() {
        assert_eq!(OpCode::LdcI4S.operand_type().size(), Some(1));
        assert_eq!(OpCode::Ldloc.operand_type().size(), Some(2));
        assert_eq!(OpCode::LdcR8.operand_type().size(), Some(8));
        assert_eq!(OpCode::Switch.operand_type().size(), None);
        assert_eq!(OpCode::Sub.to_string(), "sub");
    }
}
