use std::{
    fmt::{self, Display, Formatter},
    ops::Deref,
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Constant,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    True,
    False,
    Null,
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    Minus,
    Bang,
    JumpNotTruthy,
    Jump,
    GetGlobal,
    SetGlobal,
    GetLocal,
    SetLocal,
    GetFree,
    Array,
    Index,
    Len,
    Call,
    ReturnValue,
    Return,
    Closure,
    CurrentClosure,
    Export,
}

const OPCODES: [Opcode; 31] = [
    Opcode::Constant,
    Opcode::Pop,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::True,
    Opcode::False,
    Opcode::Null,
    Opcode::Equal,
    Opcode::NotEqual,
    Opcode::GreaterThan,
    Opcode::LessThan,
    Opcode::Minus,
    Opcode::Bang,
    Opcode::JumpNotTruthy,
    Opcode::Jump,
    Opcode::GetGlobal,
    Opcode::SetGlobal,
    Opcode::GetLocal,
    Opcode::SetLocal,
    Opcode::GetFree,
    Opcode::Array,
    Opcode::Index,
    Opcode::Len,
    Opcode::Call,
    Opcode::ReturnValue,
    Opcode::Return,
    Opcode::Closure,
    Opcode::CurrentClosure,
    Opcode::Export,
];

impl Opcode {
    /// Byte width of each operand that follows the opcode.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            Opcode::Constant
            | Opcode::JumpNotTruthy
            | Opcode::Jump
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::Array
            | Opcode::Export => &[2],
            Opcode::GetLocal | Opcode::SetLocal | Opcode::GetFree | Opcode::Call => &[1],
            Opcode::Closure => &[2, 1],
            _ => &[],
        }
    }

    /// Full encoded length of an instruction with this opcode.
    pub fn width(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        OPCODES.get(byte as usize).copied().ok_or(byte)
    }
}

#[derive(Debug, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<usize>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<usize>) -> Self {
        Self { opcode, operands }
    }

    /// Encodes the instruction. Operands are truncated to their declared
    /// width; the compiler range-checks them before emitting.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.opcode.width());
        bytes.push(self.opcode as u8);
        for (operand, width) in self.operands.iter().zip(self.opcode.operand_widths()) {
            match width {
                2 => bytes.extend_from_slice(&(*operand as u16).to_be_bytes()),
                _ => bytes.push(*operand as u8),
            }
        }
        bytes
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Op{:?}", self.opcode)?;
        for operand in self.operands.iter() {
            write!(f, " {}", operand)?;
        }
        Ok(())
    }
}

/// Decodes the operands of `opcode` from `bytes`, which starts right after
/// the opcode byte. Returns the operands and the number of bytes read.
pub fn read_operands(opcode: Opcode, bytes: &[u8]) -> (Vec<usize>, usize) {
    let mut offset = 0;
    let operands = opcode
        .operand_widths()
        .iter()
        .map(|width| {
            let operand = match width {
                2 => read_u16(&bytes[offset..]) as usize,
                _ => read_u8(&bytes[offset..]) as usize,
            };
            offset += width;
            operand
        })
        .collect();
    (operands, offset)
}

pub fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

pub fn read_u8(bytes: &[u8]) -> u8 {
    bytes[0]
}

/// A flat, encoded instruction stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instructions(pub Vec<u8>);

impl Instructions {
    /// Decodes the stream into instructions paired with their byte offsets.
    pub fn decode(&self) -> Result<Vec<(usize, Instruction)>, u8> {
        let mut decoded = Vec::new();
        let mut position = 0;
        while position < self.0.len() {
            let opcode = Opcode::try_from(self.0[position])?;
            if position + opcode.width() > self.0.len() {
                return Err(self.0[position]);
            }
            let (operands, read) = read_operands(opcode, &self.0[position + 1..]);
            decoded.push((position, Instruction::new(opcode, operands)));
            position += 1 + read;
        }
        Ok(decoded)
    }
}

impl Deref for Instructions {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<Instruction>> for Instructions {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self(instructions.iter().flat_map(Instruction::as_bytes).collect())
    }
}

impl Display for Instructions {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let decoded = match self.decode() {
            Ok(decoded) => decoded,
            Err(byte) => return write!(f, "<malformed instruction stream at opcode {}>", byte),
        };
        let lines = decoded
            .iter()
            .map(|(position, instruction)| format!("{:0>4} {}", position, instruction))
            .collect::<Vec<String>>();
        write!(f, "{}", lines.join("\n"))
    }
}
