//! CIL method body decoding.
//!
//! Parses tiny and fat method headers, decodes the instruction stream into
//! typed operands (metadata tokens become graph handles, `ldstr` tokens
//! become the string content), and decodes exception-handler sections in
//! both tiny and fat form.

use crate::{
    loader::{
        io::{read_le_at, Parser},
        signatures::parse_method_sig,
        streams::{Blob, UserStrings},
        tables::StandAloneSigRow,
        FieldHandle, FieldIdx, MemberRefIdx, MethodHandle, MethodIdx, MethodSig, MethodSpecIdx,
        TypeDefIdx, TypeHandle, TypeRefIdx, TypeSpecIdx,
    },
    malformed_error, Result,
};

/// Operand class of an instruction, per the ECMA-335 instruction tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand bytes
    None,
    /// 8-bit signed immediate
    ShortI,
    /// 32-bit signed immediate
    Int32,
    /// 64-bit immediate
    Int64,
    /// 32-bit float immediate
    Float32,
    /// 64-bit float immediate
    Float64,
    /// 8-bit variable/argument index
    ShortVar,
    /// 16-bit variable/argument index
    Var,
    /// 8-bit relative branch target
    ShortBranch,
    /// 32-bit relative branch target
    Branch,
    /// Jump table
    Switch,
    /// Method token
    Method,
    /// Field token
    Field,
    /// Type token
    Type,
    /// User string token
    String,
    /// Stand-alone signature token
    Sig,
    /// Arbitrary metadata token (`ldtoken`)
    Token,
}

/// Static description of one CIL opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpCode {
    /// Opcode value; two-byte opcodes carry the `0xFE` prefix in the high byte
    pub value: u16,
    /// Assembler mnemonic
    pub mnemonic: &'static str,
    /// Operand class
    pub operand: OperandKind,
}

macro_rules! opcode_table {
    ($($value:literal => $mnemonic:literal, $kind:ident;)+) => {
        /// Look up an opcode by value (`0x00xx` or `0xFExx`).
        #[must_use]
        pub fn opcode(value: u16) -> Option<OpCode> {
            match value {
                $($value => Some(OpCode {
                    value: $value,
                    mnemonic: $mnemonic,
                    operand: OperandKind::$kind,
                }),)+
                _ => None,
            }
        }
    };
}

opcode_table! {
    0x0000 => "nop", None;
    0x0001 => "break", None;
    0x0002 => "ldarg.0", None;
    0x0003 => "ldarg.1", None;
    0x0004 => "ldarg.2", None;
    0x0005 => "ldarg.3", None;
    0x0006 => "ldloc.0", None;
    0x0007 => "ldloc.1", None;
    0x0008 => "ldloc.2", None;
    0x0009 => "ldloc.3", None;
    0x000A => "stloc.0", None;
    0x000B => "stloc.1", None;
    0x000C => "stloc.2", None;
    0x000D => "stloc.3", None;
    0x000E => "ldarg.s", ShortVar;
    0x000F => "ldarga.s", ShortVar;
    0x0010 => "starg.s", ShortVar;
    0x0011 => "ldloc.s", ShortVar;
    0x0012 => "ldloca.s", ShortVar;
    0x0013 => "stloc.s", ShortVar;
    0x0014 => "ldnull", None;
    0x0015 => "ldc.i4.m1", None;
    0x0016 => "ldc.i4.0", None;
    0x0017 => "ldc.i4.1", None;
    0x0018 => "ldc.i4.2", None;
    0x0019 => "ldc.i4.3", None;
    0x001A => "ldc.i4.4", None;
    0x001B => "ldc.i4.5", None;
    0x001C => "ldc.i4.6", None;
    0x001D => "ldc.i4.7", None;
    0x001E => "ldc.i4.8", None;
    0x001F => "ldc.i4.s", ShortI;
    0x0020 => "ldc.i4", Int32;
    0x0021 => "ldc.i8", Int64;
    0x0022 => "ldc.r4", Float32;
    0x0023 => "ldc.r8", Float64;
    0x0025 => "dup", None;
    0x0026 => "pop", None;
    0x0027 => "jmp", Method;
    0x0028 => "call", Method;
    0x0029 => "calli", Sig;
    0x002A => "ret", None;
    0x002B => "br.s", ShortBranch;
    0x002C => "brfalse.s", ShortBranch;
    0x002D => "brtrue.s", ShortBranch;
    0x002E => "beq.s", ShortBranch;
    0x002F => "bge.s", ShortBranch;
    0x0030 => "bgt.s", ShortBranch;
    0x0031 => "ble.s", ShortBranch;
    0x0032 => "blt.s", ShortBranch;
    0x0033 => "bne.un.s", ShortBranch;
    0x0034 => "bge.un.s", ShortBranch;
    0x0035 => "bgt.un.s", ShortBranch;
    0x0036 => "ble.un.s", ShortBranch;
    0x0037 => "blt.un.s", ShortBranch;
    0x0038 => "br", Branch;
    0x0039 => "brfalse", Branch;
    0x003A => "brtrue", Branch;
    0x003B => "beq", Branch;
    0x003C => "bge", Branch;
    0x003D => "bgt", Branch;
    0x003E => "ble", Branch;
    0x003F => "blt", Branch;
    0x0040 => "bne.un", Branch;
    0x0041 => "bge.un", Branch;
    0x0042 => "bgt.un", Branch;
    0x0043 => "ble.un", Branch;
    0x0044 => "blt.un", Branch;
    0x0045 => "switch", Switch;
    0x0046 => "ldind.i1", None;
    0x0047 => "ldind.u1", None;
    0x0048 => "ldind.i2", None;
    0x0049 => "ldind.u2", None;
    0x004A => "ldind.i4", None;
    0x004B => "ldind.u4", None;
    0x004C => "ldind.i8", None;
    0x004D => "ldind.i", None;
    0x004E => "ldind.r4", None;
    0x004F => "ldind.r8", None;
    0x0050 => "ldind.ref", None;
    0x0051 => "stind.ref", None;
    0x0052 => "stind.i1", None;
    0x0053 => "stind.i2", None;
    0x0054 => "stind.i4", None;
    0x0055 => "stind.i8", None;
    0x0056 => "stind.r4", None;
    0x0057 => "stind.r8", None;
    0x0058 => "add", None;
    0x0059 => "sub", None;
    0x005A => "mul", None;
    0x005B => "div", None;
    0x005C => "div.un", None;
    0x005D => "rem", None;
    0x005E => "rem.un", None;
    0x005F => "and", None;
    0x0060 => "or", None;
    0x0061 => "xor", None;
    0x0062 => "shl", None;
    0x0063 => "shr", None;
    0x0064 => "shr.un", None;
    0x0065 => "neg", None;
    0x0066 => "not", None;
    0x0067 => "conv.i1", None;
    0x0068 => "conv.i2", None;
    0x0069 => "conv.i4", None;
    0x006A => "conv.i8", None;
    0x006B => "conv.r4", None;
    0x006C => "conv.r8", None;
    0x006D => "conv.u4", None;
    0x006E => "conv.u8", None;
    0x006F => "callvirt", Method;
    0x0070 => "cpobj", Type;
    0x0071 => "ldobj", Type;
    0x0072 => "ldstr", String;
    0x0073 => "newobj", Method;
    0x0074 => "castclass", Type;
    0x0075 => "isinst", Type;
    0x0076 => "conv.r.un", None;
    0x0079 => "unbox", Type;
    0x007A => "throw", None;
    0x007B => "ldfld", Field;
    0x007C => "ldflda", Field;
    0x007D => "stfld", Field;
    0x007E => "ldsfld", Field;
    0x007F => "ldsflda", Field;
    0x0080 => "stsfld", Field;
    0x0081 => "stobj", Type;
    0x0082 => "conv.ovf.i1.un", None;
    0x0083 => "conv.ovf.i2.un", None;
    0x0084 => "conv.ovf.i4.un", None;
    0x0085 => "conv.ovf.i8.un", None;
    0x0086 => "conv.ovf.u1.un", None;
    0x0087 => "conv.ovf.u2.un", None;
    0x0088 => "conv.ovf.u4.un", None;
    0x0089 => "conv.ovf.u8.un", None;
    0x008A => "conv.ovf.i.un", None;
    0x008B => "conv.ovf.u.un", None;
    0x008C => "box", Type;
    0x008D => "newarr", Type;
    0x008E => "ldlen", None;
    0x008F => "ldelema", Type;
    0x0090 => "ldelem.i1", None;
    0x0091 => "ldelem.u1", None;
    0x0092 => "ldelem.i2", None;
    0x0093 => "ldelem.u2", None;
    0x0094 => "ldelem.i4", None;
    0x0095 => "ldelem.u4", None;
    0x0096 => "ldelem.i8", None;
    0x0097 => "ldelem.i", None;
    0x0098 => "ldelem.r4", None;
    0x0099 => "ldelem.r8", None;
    0x009A => "ldelem.ref", None;
    0x009B => "stelem.i", None;
    0x009C => "stelem.i1", None;
    0x009D => "stelem.i2", None;
    0x009E => "stelem.i4", None;
    0x009F => "stelem.i8", None;
    0x00A0 => "stelem.r4", None;
    0x00A1 => "stelem.r8", None;
    0x00A2 => "stelem.ref", None;
    0x00A3 => "ldelem", Type;
    0x00A4 => "stelem", Type;
    0x00A5 => "unbox.any", Type;
    0x00B3 => "conv.ovf.i1", None;
    0x00B4 => "conv.ovf.u1", None;
    0x00B5 => "conv.ovf.i2", None;
    0x00B6 => "conv.ovf.u2", None;
    0x00B7 => "conv.ovf.i4", None;
    0x00B8 => "conv.ovf.u4", None;
    0x00B9 => "conv.ovf.i8", None;
    0x00BA => "conv.ovf.u8", None;
    0x00C2 => "refanyval", Type;
    0x00C3 => "ckfinite", None;
    0x00C6 => "mkrefany", Type;
    0x00D0 => "ldtoken", Token;
    0x00D1 => "conv.u2", None;
    0x00D2 => "conv.u1", None;
    0x00D3 => "conv.i", None;
    0x00D4 => "conv.ovf.i", None;
    0x00D5 => "conv.ovf.u", None;
    0x00D6 => "add.ovf", None;
    0x00D7 => "add.ovf.un", None;
    0x00D8 => "mul.ovf", None;
    0x00D9 => "mul.ovf.un", None;
    0x00DA => "sub.ovf", None;
    0x00DB => "sub.ovf.un", None;
    0x00DC => "endfinally", None;
    0x00DD => "leave", Branch;
    0x00DE => "leave.s", ShortBranch;
    0x00DF => "stind.i", None;
    0x00E0 => "conv.u", None;
    0xFE00 => "arglist", None;
    0xFE01 => "ceq", None;
    0xFE02 => "cgt", None;
    0xFE03 => "cgt.un", None;
    0xFE04 => "clt", None;
    0xFE05 => "clt.un", None;
    0xFE06 => "ldftn", Method;
    0xFE07 => "ldvirtftn", Method;
    0xFE09 => "ldarg", Var;
    0xFE0A => "ldarga", Var;
    0xFE0B => "starg", Var;
    0xFE0C => "ldloc", Var;
    0xFE0D => "ldloca", Var;
    0xFE0E => "stloc", Var;
    0xFE0F => "localloc", None;
    0xFE11 => "endfilter", None;
    0xFE12 => "unaligned.", ShortI;
    0xFE13 => "volatile.", None;
    0xFE14 => "tail.", None;
    0xFE15 => "initobj", Type;
    0xFE16 => "constrained.", Type;
    0xFE17 => "cpblk", None;
    0xFE18 => "initblk", None;
    0xFE19 => "no.", ShortI;
    0xFE1A => "rethrow", None;
    0xFE1C => "sizeof", Type;
    0xFE1D => "refanytype", None;
    0xFE1E => "readonly.", None;
}

/// Target of an `ldtoken` operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenTarget {
    #[allow(missing_docs)]
    Type(TypeHandle),
    #[allow(missing_docs)]
    Method(MethodHandle),
    #[allow(missing_docs)]
    Field(FieldHandle),
}

/// Decoded instruction operand with metadata tokens already resolved into
/// graph handles.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// 8-bit signed immediate
    I8(i8),
    /// 32-bit signed immediate
    I32(i32),
    /// 64-bit immediate
    I64(i64),
    /// 32-bit float
    R4(f32),
    /// 64-bit float
    R8(f64),
    /// Variable or argument index
    Var(u16),
    /// Branch target as an absolute offset into the original body
    Branch(u32),
    /// Switch targets as absolute offsets into the original body
    Switch(Vec<u32>),
    /// Method operand
    Method(MethodHandle),
    /// Field operand
    Field(FieldHandle),
    /// Type operand
    Type(TypeHandle),
    /// Inline string content from the `#US` heap
    String(std::string::String),
    /// Stand-alone call-site signature
    Signature(MethodSig),
    /// `ldtoken` operand
    Token(TokenTarget),
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset within the original body
    pub offset: u32,
    /// Opcode value (`0x00xx` or `0xFExx`)
    pub opcode: u16,
    /// Decoded operand
    pub operand: Operand,
}

impl Instruction {
    /// Assembler mnemonic of the opcode.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        opcode(self.opcode).map_or("??", |op| op.mnemonic)
    }
}

/// Kind of an exception-handler clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EhKind {
    /// Typed catch handler
    Catch,
    /// Filter handler
    Filter,
    /// Finally handler
    Finally,
    /// Fault handler
    Fault,
}

/// One exception-handler clause with absolute offsets into the original body.
#[derive(Debug, Clone, PartialEq)]
pub struct EhClause {
    #[allow(missing_docs)]
    pub kind: EhKind,
    /// First protected byte
    pub try_start: u32,
    /// One past the last protected byte
    pub try_end: u32,
    /// First handler byte
    pub handler_start: u32,
    /// One past the last handler byte
    pub handler_end: u32,
    /// Caught exception type for [`EhKind::Catch`]
    pub catch_type: Option<TypeHandle>,
    /// Filter entry offset for [`EhKind::Filter`]
    pub filter_offset: u32,
}

/// A fully decoded method body.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Operand stack depth required by the body
    pub max_stack: u16,
    /// True when locals are zero-initialized
    pub init_locals: bool,
    /// StandAloneSig token of the locals signature, 0 when absent
    pub local_sig_token: u32,
    /// Instructions in stream order
    pub instructions: Vec<Instruction>,
    /// Exception handlers in declaration order
    pub exception_handlers: Vec<EhClause>,
}

/// Resolution context the body decoder needs from the surrounding metadata.
pub struct BodyContext<'a> {
    /// `#US` heap for `ldstr` operands
    pub user_strings: &'a UserStrings<'a>,
    /// `#Blob` heap for stand-alone signatures
    pub blob: &'a Blob<'a>,
    /// StandAloneSig rows for `calli` operands
    pub stand_alone_sigs: &'a [StandAloneSigRow],
    /// Every `ldstr` operand seen, with its original `#US` token
    pub seen_strings: std::cell::RefCell<Vec<(u32, String)>>,
}

fn type_handle_from_token(token: u32) -> Result<TypeHandle> {
    let rid = token & 0x00FF_FFFF;
    if rid == 0 {
        return Err(malformed_error!("Null type token in method body"));
    }
    Ok(match token >> 24 {
        0x01 => TypeHandle::Ref(TypeRefIdx(rid - 1)),
        0x02 => TypeHandle::Def(TypeDefIdx(rid - 1)),
        0x1B => TypeHandle::Spec(TypeSpecIdx(rid - 1)),
        table => {
            return Err(malformed_error!(
                "Unexpected table {:#04x} for inline type token",
                table
            ))
        }
    })
}

fn method_handle_from_token(token: u32) -> Result<MethodHandle> {
    let rid = token & 0x00FF_FFFF;
    if rid == 0 {
        return Err(malformed_error!("Null method token in method body"));
    }
    Ok(match token >> 24 {
        0x06 => MethodHandle::Def(MethodIdx(rid - 1)),
        0x0A => MethodHandle::Ref(MemberRefIdx(rid - 1)),
        0x2B => MethodHandle::Spec(MethodSpecIdx(rid - 1)),
        table => {
            return Err(malformed_error!(
                "Unexpected table {:#04x} for inline method token",
                table
            ))
        }
    })
}

fn field_handle_from_token(token: u32) -> Result<FieldHandle> {
    let rid = token & 0x00FF_FFFF;
    if rid == 0 {
        return Err(malformed_error!("Null field token in method body"));
    }
    Ok(match token >> 24 {
        0x04 => FieldHandle::Def(FieldIdx(rid - 1)),
        0x0A => FieldHandle::Ref(MemberRefIdx(rid - 1)),
        table => {
            return Err(malformed_error!(
                "Unexpected table {:#04x} for inline field token",
                table
            ))
        }
    })
}

fn decode_operand(
    kind: OperandKind,
    parser: &mut Parser<'_>,
    ctx: &BodyContext<'_>,
) -> Result<Operand> {
    Ok(match kind {
        OperandKind::None => Operand::None,
        OperandKind::ShortI => Operand::I8(parser.read_le::<i8>()?),
        OperandKind::Int32 => Operand::I32(parser.read_le::<i32>()?),
        OperandKind::Int64 => Operand::I64(parser.read_le::<i64>()?),
        OperandKind::Float32 => Operand::R4(parser.read_le::<f32>()?),
        OperandKind::Float64 => Operand::R8(parser.read_le::<f64>()?),
        OperandKind::ShortVar => Operand::Var(u16::from(parser.read_le::<u8>()?)),
        OperandKind::Var => Operand::Var(parser.read_le::<u16>()?),
        OperandKind::ShortBranch => {
            let rel = parser.read_le::<i8>()?;
            Operand::Branch(
                u32::try_from(parser.pos() as i64 + i64::from(rel)).map_err(|_| {
                    malformed_error!("Branch target before method start - {}", rel)
                })?,
            )
        }
        OperandKind::Branch => {
            let rel = parser.read_le::<i32>()?;
            Operand::Branch(
                u32::try_from(parser.pos() as i64 + i64::from(rel)).map_err(|_| {
                    malformed_error!("Branch target before method start - {}", rel)
                })?,
            )
        }
        OperandKind::Switch => {
            let count = parser.read_le::<u32>()?;
            let mut rels = Vec::with_capacity(count as usize);
            for _ in 0..count {
                rels.push(parser.read_le::<i32>()?);
            }
            let base = parser.pos() as i64;
            let mut targets = Vec::with_capacity(rels.len());
            for rel in rels {
                targets.push(u32::try_from(base + i64::from(rel)).map_err(|_| {
                    malformed_error!("Switch target before method start - {}", rel)
                })?);
            }
            Operand::Switch(targets)
        }
        OperandKind::Method => Operand::Method(method_handle_from_token(parser.read_le()?)?),
        OperandKind::Field => Operand::Field(field_handle_from_token(parser.read_le()?)?),
        OperandKind::Type => Operand::Type(type_handle_from_token(parser.read_le()?)?),
        OperandKind::String => {
            let token = parser.read_le::<u32>()?;
            if token >> 24 != 0x70 {
                return Err(malformed_error!("Invalid user string token - {:#010x}", token));
            }
            let content = ctx.user_strings.get((token & 0x00FF_FFFF) as usize)?;
            ctx.seen_strings.borrow_mut().push((token, content.clone()));
            Operand::String(content)
        }
        OperandKind::Sig => {
            let token = parser.read_le::<u32>()?;
            if token >> 24 != 0x11 {
                return Err(malformed_error!("Invalid call-site token - {:#010x}", token));
            }
            let rid = (token & 0x00FF_FFFF) as usize;
            let row = ctx
                .stand_alone_sigs
                .get(rid.wrapping_sub(1))
                .ok_or_else(|| malformed_error!("Call-site signature row out of range - {}", rid))?;
            Operand::Signature(parse_method_sig(ctx.blob.get(row.signature as usize)?)?)
        }
        OperandKind::Token => {
            let token = parser.read_le::<u32>()?;
            let target = match token >> 24 {
                0x01 | 0x02 | 0x1B => TokenTarget::Type(type_handle_from_token(token)?),
                0x06 | 0x2B => TokenTarget::Method(method_handle_from_token(token)?),
                0x04 => TokenTarget::Field(field_handle_from_token(token)?),
                // A MemberRef can stand for either member kind; fields are the
                // overwhelmingly common ldtoken target.
                0x0A => TokenTarget::Field(field_handle_from_token(token)?),
                table => {
                    return Err(malformed_error!(
                        "Unexpected table {:#04x} for ldtoken operand",
                        table
                    ))
                }
            };
            Operand::Token(target)
        }
    })
}

/// Decode the instruction stream of one body.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on invalid opcodes or operands.
pub fn decode_instructions(code: &[u8], ctx: &BodyContext<'_>) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        let offset = parser.pos() as u32;
        let first = parser.read_le::<u8>()?;
        let value = if first == 0xFE {
            0xFE00 | u16::from(parser.read_le::<u8>()?)
        } else {
            u16::from(first)
        };

        let Some(op) = opcode(value) else {
            return Err(malformed_error!("Invalid opcode - {:#06x}", value));
        };

        let operand = decode_operand(op.operand, &mut parser, ctx)?;
        instructions.push(Instruction {
            offset,
            opcode: value,
            operand,
        });
    }

    Ok(instructions)
}

const FLAG_TINY: u8 = 0x02;
const FLAG_FAT: u8 = 0x03;
const FAT_INIT_LOCALS: u16 = 0x0010;
const FAT_MORE_SECTS: u16 = 0x0008;
const SECT_EH_TABLE: u8 = 0x01;
const SECT_FAT_FORMAT: u8 = 0x40;
const SECT_MORE_SECTS: u8 = 0x80;

fn decode_eh_clause(flags: u32, offsets: [u32; 4], token: u32) -> Result<EhClause> {
    let kind = match flags {
        0x0000 => EhKind::Catch,
        0x0001 => EhKind::Filter,
        0x0002 => EhKind::Finally,
        0x0004 => EhKind::Fault,
        _ => return Err(malformed_error!("Invalid exception clause flags - {:#06x}", flags)),
    };

    Ok(EhClause {
        kind,
        try_start: offsets[0],
        try_end: offsets[0] + offsets[1],
        handler_start: offsets[2],
        handler_end: offsets[2] + offsets[3],
        catch_type: if kind == EhKind::Catch {
            Some(type_handle_from_token(token)?)
        } else {
            None
        },
        filter_offset: if kind == EhKind::Filter { token } else { 0 },
    })
}

fn decode_eh_sections(data: &[u8], start: usize) -> Result<Vec<EhClause>> {
    let mut clauses = Vec::new();
    let mut offset = start;

    loop {
        // Section headers are 4-byte aligned.
        offset = (offset + 3) & !3;
        let mut cursor = offset;
        let flags: u8 = read_le_at(data, &mut cursor)?;
        if flags & SECT_EH_TABLE == 0 {
            return Err(malformed_error!("Unknown method data section - {:#04x}", flags));
        }

        if flags & SECT_FAT_FORMAT != 0 {
            let b0: u8 = read_le_at(data, &mut cursor)?;
            let b1: u8 = read_le_at(data, &mut cursor)?;
            let b2: u8 = read_le_at(data, &mut cursor)?;
            let size = u32::from(b0) | (u32::from(b1) << 8) | (u32::from(b2) << 16);
            let count = (size as usize - 4) / 24;
            for _ in 0..count {
                let clause_flags: u32 = read_le_at(data, &mut cursor)?;
                let try_start: u32 = read_le_at(data, &mut cursor)?;
                let try_len: u32 = read_le_at(data, &mut cursor)?;
                let handler_start: u32 = read_le_at(data, &mut cursor)?;
                let handler_len: u32 = read_le_at(data, &mut cursor)?;
                let token: u32 = read_le_at(data, &mut cursor)?;
                clauses.push(decode_eh_clause(
                    clause_flags,
                    [try_start, try_len, handler_start, handler_len],
                    token,
                )?);
            }
            offset += size as usize;
        } else {
            let size: u8 = read_le_at(data, &mut cursor)?;
            let _reserved: u16 = read_le_at(data, &mut cursor)?;
            let count = (size as usize - 4) / 12;
            for _ in 0..count {
                let clause_flags: u16 = read_le_at(data, &mut cursor)?;
                let try_start: u16 = read_le_at(data, &mut cursor)?;
                let try_len: u8 = read_le_at(data, &mut cursor)?;
                let handler_start: u16 = read_le_at(data, &mut cursor)?;
                let handler_len: u8 = read_le_at(data, &mut cursor)?;
                let token: u32 = read_le_at(data, &mut cursor)?;
                clauses.push(decode_eh_clause(
                    u32::from(clause_flags),
                    [
                        u32::from(try_start),
                        u32::from(try_len),
                        u32::from(handler_start),
                        u32::from(handler_len),
                    ],
                    token,
                )?);
            }
            offset += size as usize;
        }

        if flags & SECT_MORE_SECTS == 0 {
            break;
        }
    }

    Ok(clauses)
}

/// Decode a complete method body starting at its header.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on an invalid header, instruction
/// stream, or exception section.
pub fn decode_body(data: &[u8], ctx: &BodyContext<'_>) -> Result<MethodBody> {
    if data.is_empty() {
        return Err(malformed_error!("Empty method body"));
    }

    let first = data[0];
    match first & 0x03 {
        FLAG_TINY => {
            let code_size = usize::from(first >> 2);
            if 1 + code_size > data.len() {
                return Err(crate::Error::OutOfBounds);
            }
            Ok(MethodBody {
                max_stack: 8,
                init_locals: false,
                local_sig_token: 0,
                instructions: decode_instructions(&data[1..1 + code_size], ctx)?,
                exception_handlers: Vec::new(),
            })
        }
        FLAG_FAT => {
            let mut offset = 0;
            let flags_and_size: u16 = read_le_at(data, &mut offset)?;
            let header_size = usize::from(flags_and_size >> 12) * 4;
            let max_stack: u16 = read_le_at(data, &mut offset)?;
            let code_size: u32 = read_le_at(data, &mut offset)?;
            let local_sig_token: u32 = read_le_at(data, &mut offset)?;

            let code_start = header_size;
            let code_end = code_start + code_size as usize;
            if code_end > data.len() {
                return Err(crate::Error::OutOfBounds);
            }

            let instructions = decode_instructions(&data[code_start..code_end], ctx)?;
            let exception_handlers = if flags_and_size & FAT_MORE_SECTS != 0 {
                decode_eh_sections(data, code_end)?
            } else {
                Vec::new()
            };

            Ok(MethodBody {
                max_stack,
                init_locals: flags_and_size & FAT_INIT_LOCALS != 0,
                local_sig_token,
                instructions,
                exception_handlers,
            })
        }
        _ => Err(malformed_error!("Invalid method header - {:#04x}", first)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_ctx() -> (Vec<u8>, Vec<u8>) {
        (vec![0u8], vec![0u8])
    }

    fn with_ctx<T>(f: impl FnOnce(&BodyContext<'_>) -> T) -> T {
        let (us_data, blob_data) = empty_ctx();
        let us = UserStrings::from(&us_data).unwrap();
        let blob = Blob::from(&blob_data).unwrap();
        let ctx = BodyContext {
            user_strings: &us,
            blob: &blob,
            stand_alone_sigs: &[],
            seen_strings: std::cell::RefCell::new(Vec::new()),
        };
        f(&ctx)
    }

    #[test]
    fn tiny_body_nop_ret() {
        with_ctx(|ctx| {
            // Tiny header: code size 2
            let body = decode_body(&[0x02 | (2 << 2), 0x00, 0x2A], ctx).unwrap();
            assert_eq!(body.max_stack, 8);
            assert_eq!(body.local_sig_token, 0);
            assert_eq!(body.instructions.len(), 2);
            assert_eq!(body.instructions[0].mnemonic(), "nop");
            assert_eq!(body.instructions[1].mnemonic(), "ret");
        });
    }

    #[test]
    fn call_operand_resolves_member_ref() {
        with_ctx(|ctx| {
            // call 0x0A000003
            let code = [0x28, 0x03, 0x00, 0x00, 0x0A, 0x2A];
            let instructions = decode_instructions(&code, ctx).unwrap();
            assert_eq!(
                instructions[0].operand,
                Operand::Method(MethodHandle::Ref(MemberRefIdx(2)))
            );
        });
    }

    #[test]
    fn short_branch_targets_are_absolute() {
        with_ctx(|ctx| {
            // br.s +0 lands on the following ret
            let code = [0x2B, 0x00, 0x2A];
            let instructions = decode_instructions(&code, ctx).unwrap();
            assert_eq!(instructions[0].operand, Operand::Branch(2));
        });
    }

    #[test]
    fn switch_targets_are_absolute() {
        with_ctx(|ctx| {
            // switch with one target, +1 past the following ret
            let code = [0x45, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x2A, 0x00];
            let instructions = decode_instructions(&code, ctx).unwrap();
            assert_eq!(instructions[0].operand, Operand::Switch(vec![10]));
        });
    }

    #[test]
    fn two_byte_opcodes_decode() {
        with_ctx(|ctx| {
            // ceq
            let code = [0xFE, 0x01];
            let instructions = decode_instructions(&code, ctx).unwrap();
            assert_eq!(instructions[0].opcode, 0xFE01);
            assert_eq!(instructions[0].mnemonic(), "ceq");
        });
    }

    #[test]
    fn fat_body_with_eh_section() {
        with_ctx(|ctx| {
            let mut data = Vec::new();
            // Fat header: flags 0x3013 (fat, init locals, more sects), size 3 dwords
            data.extend_from_slice(&0x301Bu16.to_le_bytes());
            data.extend_from_slice(&2u16.to_le_bytes()); // max stack
            data.extend_from_slice(&2u32.to_le_bytes()); // code size
            data.extend_from_slice(&0u32.to_le_bytes()); // no locals
            data.extend_from_slice(&[0x00, 0x2A]); // nop, ret
            while data.len() % 4 != 0 {
                data.push(0);
            }
            // Tiny EH section: one finally clause
            data.push(SECT_EH_TABLE);
            data.push(16); // section size: 4 + 12
            data.extend_from_slice(&0u16.to_le_bytes());
            data.extend_from_slice(&0x0002u16.to_le_bytes()); // finally
            data.extend_from_slice(&0u16.to_le_bytes()); // try start
            data.push(1); // try len
            data.extend_from_slice(&1u16.to_le_bytes()); // handler start
            data.push(1); // handler len
            data.extend_from_slice(&0u32.to_le_bytes());

            let body = decode_body(&data, ctx).unwrap();
            assert!(body.init_locals);
            assert_eq!(body.exception_handlers.len(), 1);
            let clause = &body.exception_handlers[0];
            assert_eq!(clause.kind, EhKind::Finally);
            assert_eq!(clause.try_end, 1);
            assert_eq!(clause.handler_start, 1);
        });
    }

    #[test]
    fn invalid_opcode_is_rejected() {
        with_ctx(|ctx| {
            assert!(decode_instructions(&[0xC0], ctx).is_err());
        });
    }
}
