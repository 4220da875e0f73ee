use std::borrow::Cow;
use std::io::Write;
use crate::{ByteCodeError, Executable, Instruction, Opcode, Operand, OperandKind, Operands, Source, Span};

pub const VERSION: u8 = 1;

const MAGIC: [u8; 4] = *b"NOJA";
const FLAG_SOURCE: u8 = 1;

/// header (16 bytes)
///   magic:              4 * u8 = "NOJA"
///   min_reader_version: u8 = 1
///   writer_version:     u8 = 1
///   flags:              u8, bit 0 = source embedded
///   reserved:           u8 = 0
///   instruction count:  u32_le
///   reserved:           u32 = 0
///
/// instructions:
///   opcode:        u8
///   span offset:   u32_le
///   span length:   u32_le
///   operands, as given by [Opcode::signature]:
///     int:   i64_le
///     float: f64 bits, u64_le
///     str:   len u32_le, utf8 bytes
///     index: u32_le
///
/// source (if flagged):
///   name: str
///   text: str
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub min_reader_version: u8,
    pub writer_version: u8,
    pub has_source: bool,
    pub instr_count: u32,
}

impl Header {
    pub const SIZE: usize = 16;

    pub fn serialize(&self) -> [u8; 16] {
        let mut header = [0_u8; 16];
        header[0..4].copy_from_slice(&MAGIC);
        header[4] = self.min_reader_version;
        header[5] = self.writer_version;
        header[6] = if self.has_source { FLAG_SOURCE } else { 0 };
        header[8..12].copy_from_slice(&self.instr_count.to_le_bytes());
        header
    }

    pub fn write<W: Write>(&self, to: &mut W) -> std::io::Result<()> {
        to.write_all(self.serialize().as_slice())
    }
}

impl<'img> TryFrom<&'img [u8]> for Header {
    type Error = ByteCodeError;

    fn try_from(value: &'img [u8]) -> Result<Self, Self::Error> {
        let mut rd = Reader::new(value);

        if rd.take(4)? != MAGIC.as_slice() {
            return Err(ByteCodeError::InvalidMagic);
        }

        let min_reader_version = rd.u8()?;
        let writer_version = rd.u8()?;
        if VERSION < min_reader_version {
            return Err(ByteCodeError::UnsupportedVersion);
        }

        let flags = rd.u8()?;
        rd.u8()?;
        let instr_count = rd.u32()?;
        rd.u32()?;

        Ok(Header {
            min_reader_version,
            writer_version,
            has_source: flags & FLAG_SOURCE != 0,
            instr_count,
        })
    }
}

struct Reader<'img> {
    bytes: &'img [u8],
    pos: usize,
}

impl<'img> Reader<'img> {
    fn new(bytes: &'img [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'img [u8], ByteCodeError> {
        let end = self.pos.checked_add(n).ok_or(ByteCodeError::NotEnoughBytes)?;
        let out = self.bytes.get(self.pos..end).ok_or(ByteCodeError::NotEnoughBytes)?;
        self.pos = end;
        Ok(out)
    }

    fn array<const L: usize>(&mut self) -> Result<[u8; L], ByteCodeError> {
        let mut out = [0_u8; L];
        out.copy_from_slice(self.take(L)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ByteCodeError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, ByteCodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, ByteCodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn str(&mut self) -> Result<&'img str, ByteCodeError> {
        let len = self.u32()? as usize;
        std::str::from_utf8(self.take(len)?).map_err(|_| ByteCodeError::InvalidStringEncoding)
    }
}

fn write_str<W: Write>(to: &mut W, s: &str) -> Result<(), ByteCodeError> {
    let len = u32::try_from(s.len()).map_err(|_| ByteCodeError::Overflow)?;
    to.write_all(&len.to_le_bytes())?;
    to.write_all(s.as_bytes())?;
    Ok(())
}

impl<'a> Instruction<'a> {
    pub fn write<W: Write>(&self, to: &mut W) -> Result<(), ByteCodeError> {
        let offset = u32::try_from(self.span.offset).map_err(|_| ByteCodeError::Overflow)?;
        let length = u32::try_from(self.span.length).map_err(|_| ByteCodeError::Overflow)?;

        to.write_all(&[self.opcode as u8])?;
        to.write_all(&offset.to_le_bytes())?;
        to.write_all(&length.to_le_bytes())?;

        for op in self.operands.iter() {
            match op {
                Operand::Int(v) => to.write_all(&v.to_le_bytes())?,
                Operand::Float(v) => to.write_all(&v.to_bits().to_le_bytes())?,
                Operand::Str(v) => write_str(to, v)?,
                Operand::Index(v) => to.write_all(&v.to_le_bytes())?,
                Operand::Forward(_) => return Err(ByteCodeError::UnfinalizedOperand(self.opcode)),
            }
        }
        Ok(())
    }

    fn read(rd: &mut Reader<'a>) -> Result<Self, ByteCodeError> {
        let byte = rd.u8()?;
        let opcode = Opcode::try_from(byte).map_err(|_| ByteCodeError::UnknownOpcode(byte))?;
        let offset = rd.u32()? as usize;
        let length = rd.u32()? as usize;

        let mut operands = Operands::new();
        for kind in opcode.signature() {
            operands.push(match kind {
                OperandKind::Int => Operand::Int(rd.u64()? as i64),
                OperandKind::Float => Operand::Float(f64::from_bits(rd.u64()?)),
                OperandKind::Str => Operand::Str(Cow::Borrowed(rd.str()?)),
                OperandKind::Index => Operand::Index(rd.u32()?),
            });
        }

        Ok(Instruction { opcode, operands, span: Span::new(offset, length) })
    }
}

impl<'a> Executable<'a> {
    /// writes the binary image; the source is only included if `with_source` is set and one is attached
    pub fn write<W: Write>(&self, to: &mut W, with_source: bool) -> Result<(), ByteCodeError> {
        let source = self.source().filter(|_| with_source);

        Header {
            min_reader_version: VERSION,
            writer_version: VERSION,
            has_source: source.is_some(),
            instr_count: u32::try_from(self.len()).map_err(|_| ByteCodeError::Overflow)?,
        }.write(to)?;

        for instr in self.code() {
            instr.write(to)?;
        }

        if let Some(source) = source {
            write_str(to, source.name())?;
            write_str(to, source.text())?;
        }
        Ok(())
    }

    /// strings in the result borrow from `bytes`
    pub fn read(bytes: &'a [u8]) -> Result<Self, ByteCodeError> {
        let header = Header::try_from(bytes)?;
        let mut rd = Reader::new(bytes);
        rd.take(Header::SIZE)?;

        let mut code = Vec::new();
        for _ in 0..header.instr_count {
            code.push(Instruction::read(&mut rd)?);
        }

        let len = code.len();
        for (index, instr) in code.iter().enumerate() {
            match instr.target() {
                Some(target) if target as usize >= len => {
                    return Err(ByteCodeError::TargetOutOfRange { opcode: instr.opcode, index, target, len });
                }
                _ => (),
            }
        }

        let source = if header.has_source {
            let name = rd.str()?;
            let text = rd.str()?;
            Some(Cow::Owned(Source::new(name, text)))
        } else {
            None
        };

        Ok(Executable::new(code, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExeBuilder, ForwardArena};

    fn sample(source: &Source) -> Executable<'_> {
        let mut arena = ForwardArena::new();
        let mut b = ExeBuilder::new(&mut arena);
        let end = b.forward().unwrap();
        let sp = Span::new(0, 5);
        b.append(Opcode::PushFlt, [Operand::Float(-0.5)], sp).unwrap();
        b.append(Opcode::PushStr, [Operand::Str("héllo".into())], sp).unwrap();
        b.append(Opcode::Call, [Operand::Int(1), Operand::Int(-3)], sp).unwrap();
        b.append(Opcode::JumpIfAndPop, [Operand::Forward(end)], sp).unwrap();
        b.resolve(end).unwrap();
        b.append(Opcode::Return, [Operand::Int(0)], Span::at(source.len())).unwrap();
        b.finalize().unwrap().with_source(source)
    }

    #[test]
    fn image_keeps_every_operand() {
        let source = Source::new("sample.noja", "print(\"héllo\");");
        let exe = sample(&source);

        let mut bytes = vec![];
        exe.write(&mut bytes, true).unwrap();
        let back = Executable::read(&bytes).unwrap();
        assert_eq!(back, exe);

        let mut stripped = vec![];
        exe.write(&mut stripped, false).unwrap();
        let back = Executable::read(&stripped).unwrap();
        assert!(back.source().is_none());
        assert_eq!(back.code(), exe.code());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(Executable::read(b"NOJ"), Err(ByteCodeError::NotEnoughBytes)));
        assert!(matches!(Executable::read(&[0_u8; 16]), Err(ByteCodeError::InvalidMagic)));

        let source = Source::new("s", "");
        let mut bytes = vec![];
        sample(&source).write(&mut bytes, false).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(Executable::read(&bytes), Err(ByteCodeError::NotEnoughBytes)));

        let mut bytes = vec![];
        sample(&source).write(&mut bytes, false).unwrap();
        bytes[Header::SIZE] = 0xff;
        assert!(matches!(Executable::read(&bytes), Err(ByteCodeError::UnknownOpcode(0xff))));
    }

    #[test]
    fn rejects_jumps_past_the_end() {
        let mut arena = ForwardArena::new();
        let mut b = ExeBuilder::new(&mut arena);
        b.append(Opcode::Jump, [Operand::Index(1)], Span::new(0, 1)).unwrap();
        b.append(Opcode::Return, [Operand::Int(0)], Span::at(1)).unwrap();
        let exe = b.finalize().unwrap();

        let mut bytes = vec![];
        exe.write(&mut bytes, false).unwrap();
        assert!(Executable::read(&bytes).is_ok());

        // opcode, offset and length come before the operand
        let at = Header::SIZE + 9;
        bytes[at..at + 4].copy_from_slice(&999_u32.to_le_bytes());
        assert!(matches!(
            Executable::read(&bytes),
            Err(ByteCodeError::TargetOutOfRange { opcode: Opcode::Jump, index: 0, target: 999, len: 2 })
        ));
    }
}
