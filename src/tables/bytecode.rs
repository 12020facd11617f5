//! Byte-code table.
//!
//! Re-encodes every method body into one contiguous stream, rewriting each
//! metadata operand to its renumbered 16-bit identifier. Token operands
//! shrink from four bytes to two, so bodies are re-laid-out in two passes:
//! a size pass computing each instruction's new offset, then an emit pass
//! that rewrites operands and re-relativizes branch targets. Exception
//! handler records follow their method's code, closed by a count byte.

use rustc_hash::FxHashMap;

use crate::{
    loader::{
        body::{opcode, EhClause, EhKind, Instruction, MethodBody, Operand, OperandKind},
        MethodIdx,
    },
    malformed_error,
    tables::{signatures::method_sig_id, TablesContext},
    Error, Result,
};

/// Width of one serialized exception-handler record.
pub const EH_RECORD_SIZE: usize = 12;

/// The byte-code stream and the method offsets into it.
pub struct ByteCodeTable {
    stream: Vec<u8>,
    rvas: FxHashMap<MethodIdx, u32>,
}

impl ByteCodeTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        ByteCodeTable {
            stream: Vec::new(),
            rvas: FxHashMap::default(),
        }
    }

    /// Append one re-encoded body, recording the method's stream offset.
    pub fn push(&mut self, idx: MethodIdx, bytes: &[u8]) -> u32 {
        let rva = self.stream.len() as u32;
        self.rvas.insert(idx, rva);
        self.stream.extend_from_slice(bytes);
        rva
    }

    /// Stream offset of an assembled method.
    #[must_use]
    pub fn rva_of(&self, idx: MethodIdx) -> Option<u32> {
        self.rvas.get(&idx).copied()
    }

    /// Current stream length.
    #[must_use]
    pub fn stream_len(&self) -> usize {
        self.stream.len()
    }

    /// Emit the raw stream.
    pub fn write(&self, minimize_complete: bool, out: &mut Vec<u8>) {
        if !minimize_complete {
            return;
        }
        out.extend_from_slice(&self.stream);
    }
}

impl Default for ByteCodeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn opcode_len(value: u16) -> usize {
    if value > 0xFF {
        2
    } else {
        1
    }
}

/// Operand width in the source encoding.
fn old_operand_size(kind: OperandKind, operand: &Operand) -> usize {
    match kind {
        OperandKind::None => 0,
        OperandKind::ShortI | OperandKind::ShortVar | OperandKind::ShortBranch => 1,
        OperandKind::Var => 2,
        OperandKind::Int32
        | OperandKind::Float32
        | OperandKind::Branch
        | OperandKind::Method
        | OperandKind::Field
        | OperandKind::Type
        | OperandKind::String
        | OperandKind::Sig
        | OperandKind::Token => 4,
        OperandKind::Int64 | OperandKind::Float64 => 8,
        OperandKind::Switch => match operand {
            Operand::Switch(targets) => 4 + 4 * targets.len(),
            _ => 4,
        },
    }
}

/// Operand width after renumbering: metadata tokens shrink to 16 bits,
/// everything else keeps the source width.
fn new_operand_size(kind: OperandKind, operand: &Operand) -> usize {
    match kind {
        OperandKind::Method
        | OperandKind::Field
        | OperandKind::Type
        | OperandKind::String
        | OperandKind::Sig => 2,
        _ => old_operand_size(kind, operand),
    }
}

struct BodyLayout {
    /// Old instruction offset (and old body length) to new offset
    offsets: FxHashMap<u32, u32>,
    new_len: u32,
}

impl BodyLayout {
    fn map(&self, old: u32) -> Result<u32> {
        self.offsets
            .get(&old)
            .copied()
            .ok_or_else(|| malformed_error!("Branch into the middle of an instruction - {}", old))
    }
}

fn layout_body(instructions: &[Instruction]) -> Result<BodyLayout> {
    let mut offsets = FxHashMap::default();
    let mut new_offset = 0u32;
    let mut old_end = 0u32;

    for instruction in instructions {
        let Some(op) = opcode(instruction.opcode) else {
            return Err(malformed_error!("Invalid opcode - {:#06x}", instruction.opcode));
        };
        offsets.insert(instruction.offset, new_offset);
        let old_size = opcode_len(op.value) + old_operand_size(op.operand, &instruction.operand);
        let new_size = opcode_len(op.value) + new_operand_size(op.operand, &instruction.operand);
        old_end = instruction.offset + old_size as u32;
        new_offset += new_size as u32;
    }

    // The one-past-the-end offset is a valid branch and handler-end target.
    offsets.insert(old_end, new_offset);
    Ok(BodyLayout {
        offsets,
        new_len: new_offset,
    })
}

fn write_branch_operand(out: &mut Vec<u8>, kind: OperandKind, rel: i64) -> Result<()> {
    match kind {
        OperandKind::ShortBranch => {
            let rel = i8::try_from(rel)
                .map_err(|_| malformed_error!("Short branch out of range - {}", rel))?;
            out.push(rel as u8);
        }
        OperandKind::Branch => {
            let rel = i32::try_from(rel)
                .map_err(|_| malformed_error!("Branch out of range - {}", rel))?;
            out.extend_from_slice(&rel.to_le_bytes());
        }
        _ => unreachable!("branch writer called for non-branch operand"),
    }
    Ok(())
}

fn encode_eh_clause(
    ctx: &mut TablesContext<'_>,
    layout: &BodyLayout,
    clause: &EhClause,
    out: &mut Vec<u8>,
) -> Result<()> {
    let (kind, last): (u16, u16) = match clause.kind {
        EhKind::Catch => {
            let handle = clause
                .catch_type
                .ok_or_else(|| malformed_error!("Catch clause without a type"))?;
            (0x0000, ctx.inline_type_token(handle)?)
        }
        EhKind::Filter => {
            let offset = layout.map(clause.filter_offset)?;
            let narrow = u16::try_from(offset)
                .map_err(|_| Error::IndexOverflow("exception-handler"))?;
            (0x0001, narrow)
        }
        EhKind::Finally => (0x0002, 0),
        EhKind::Fault => (0x0004, 0),
    };

    let start = out.len();
    out.extend_from_slice(&kind.to_le_bytes());
    for offset in [
        clause.try_start,
        clause.try_end,
        clause.handler_start,
        clause.handler_end,
    ] {
        let mapped = layout.map(offset)?;
        let narrow =
            u16::try_from(mapped).map_err(|_| Error::IndexOverflow("exception-handler"))?;
        out.extend_from_slice(&narrow.to_le_bytes());
    }
    out.extend_from_slice(&last.to_le_bytes());

    if out.len() - start != EH_RECORD_SIZE {
        return Err(Error::InvalidRecord {
            table: "exception-handler",
            expected: EH_RECORD_SIZE,
            actual: out.len() - start,
        });
    }
    Ok(())
}

/// Re-encode one body into its nano form.
///
/// # Errors
/// Returns an unresolved-reference error for operands no table can map, and
/// propagates string/signature interning failures.
pub fn encode_body(ctx: &mut TablesContext<'_>, body: &MethodBody) -> Result<Vec<u8>> {
    let layout = layout_body(&body.instructions)?;
    let mut out = Vec::with_capacity(layout.new_len as usize);

    for instruction in &body.instructions {
        let op = opcode(instruction.opcode)
            .ok_or_else(|| malformed_error!("Invalid opcode - {:#06x}", instruction.opcode))?;

        if op.value > 0xFF {
            out.push(0xFE);
            out.push((op.value & 0xFF) as u8);
        } else {
            out.push(op.value as u8);
        }

        match (&instruction.operand, op.operand) {
            (Operand::None, _) => {}
            (Operand::I8(value), _) => out.push(*value as u8),
            (Operand::I32(value), _) => out.extend_from_slice(&value.to_le_bytes()),
            (Operand::I64(value), _) => out.extend_from_slice(&value.to_le_bytes()),
            (Operand::R4(value), _) => out.extend_from_slice(&value.to_le_bytes()),
            (Operand::R8(value), _) => out.extend_from_slice(&value.to_le_bytes()),
            (Operand::Var(value), OperandKind::ShortVar) => out.push(*value as u8),
            (Operand::Var(value), _) => out.extend_from_slice(&value.to_le_bytes()),
            (Operand::Branch(target), kind) => {
                let new_target = layout.map(*target)?;
                let size = opcode_len(op.value) + new_operand_size(kind, &instruction.operand);
                let new_next = layout.map(instruction.offset)? + size as u32;
                write_branch_operand(&mut out, kind, i64::from(new_target) - i64::from(new_next))?;
            }
            (Operand::Switch(targets), _) => {
                out.extend_from_slice(&(targets.len() as u32).to_le_bytes());
                let size = opcode_len(op.value) + 4 + 4 * targets.len();
                let new_next = layout.map(instruction.offset)? + size as u32;
                for target in targets {
                    let new_target = layout.map(*target)?;
                    let rel = i32::try_from(i64::from(new_target) - i64::from(new_next))
                        .map_err(|_| malformed_error!("Switch target out of range"))?;
                    out.extend_from_slice(&rel.to_le_bytes());
                }
            }
            (Operand::Method(handle), _) => {
                let id = ctx.resolve_method_reference_id(*handle)?;
                out.extend_from_slice(&id.to_le_bytes());
            }
            (Operand::Field(handle), _) => {
                let id = ctx.resolve_field_reference_id(*handle)?;
                out.extend_from_slice(&id.to_le_bytes());
            }
            (Operand::Type(handle), _) => {
                let id = ctx.inline_type_token(*handle)?;
                out.extend_from_slice(&id.to_le_bytes());
            }
            (Operand::String(value), _) => {
                let id = ctx.strings.get_or_create(value, true)?;
                out.extend_from_slice(&id.to_le_bytes());
            }
            (Operand::Signature(sig), _) => {
                let id = method_sig_id(ctx, sig)?;
                out.extend_from_slice(&id.to_le_bytes());
            }
            (Operand::Token(target), _) => {
                let token = ctx.nano_token(*target)?;
                out.extend_from_slice(&token.to_le_bytes());
            }
        }
    }

    if !body.exception_handlers.is_empty() {
        for clause in &body.exception_handlers {
            encode_eh_clause(ctx, &layout, clause, &mut out)?;
        }
        let count = u8::try_from(body.exception_handlers.len())
            .map_err(|_| Error::NotSupported("more than 255 exception handlers".to_string()))?;
        out.push(count);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_operands_shrink_to_two_bytes() {
        assert_eq!(new_operand_size(OperandKind::Method, &Operand::None), 2);
        assert_eq!(new_operand_size(OperandKind::Type, &Operand::None), 2);
        assert_eq!(old_operand_size(OperandKind::Method, &Operand::None), 4);
        assert_eq!(
            new_operand_size(OperandKind::Token, &Operand::None),
            old_operand_size(OperandKind::Token, &Operand::None)
        );
    }

    #[test]
    fn layout_tracks_shrinking_offsets() {
        // call (5 bytes old, 3 new), ret (1 byte)
        let instructions = vec![
            Instruction {
                offset: 0,
                opcode: 0x28,
                operand: Operand::Method(crate::loader::MethodHandle::Def(MethodIdx(0))),
            },
            Instruction {
                offset: 5,
                opcode: 0x2A,
                operand: Operand::None,
            },
        ];
        let layout = layout_body(&instructions).unwrap();
        assert_eq!(layout.map(0).unwrap(), 0);
        assert_eq!(layout.map(5).unwrap(), 3);
        assert_eq!(layout.map(6).unwrap(), 4);
        assert_eq!(layout.new_len, 4);
        assert!(layout.map(2).is_err());
    }
}
