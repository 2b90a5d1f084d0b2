//! Textual dump of linked modules, used by `--disassemble`.

use std::fmt::Write;

use crate::{
    bytecode::{
        module::{BytecodeFunction, BytecodeMember, BytecodeModule},
        op::Opcode,
    },
    strings::StringTable,
};

/// Renders a whole module: members, record templates, exports and the
/// disassembly of every function.
#[must_use]
pub fn dump_module(module: &BytecodeModule, strings: &StringTable) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module {}", strings.get(module.name));

    let _ = writeln!(out, "\nmembers:");
    for (index, member) in module.members.iter().enumerate() {
        let rendered = match member {
            BytecodeMember::Integer(value) => format!("integer {value}"),
            BytecodeMember::Float(value) => {
                let mut buffer = ryu::Buffer::new();
                format!("float {}", buffer.format(*value))
            }
            BytecodeMember::String(value) => format!("string {:?}", strings.get(*value)),
            BytecodeMember::Symbol { name } => format!("symbol -> {}", name.index()),
            BytecodeMember::Import { path } => format!("import -> {}", path.index()),
            BytecodeMember::Variable { name, initial } => match initial {
                Some(initial) => format!("variable name -> {} initial -> {}", name.index(), initial.index()),
                None => format!("variable name -> {}", name.index()),
            },
            BytecodeMember::Function { id } => format!("function #{}", id.index()),
            BytecodeMember::RecordTemplate { id } => format!("record template #{}", id.index()),
        };
        let _ = writeln!(out, "  {index:4}: {rendered}");
    }

    if !module.records.is_empty() {
        let _ = writeln!(out, "\nrecord templates:");
        for (index, record) in module.records.iter().enumerate() {
            let keys: Vec<String> = record.keys.iter().map(|key| key.index().to_string()).collect();
            let _ = writeln!(out, "  {index:4}: keys [{}]", keys.join(", "));
        }
    }

    if !module.exports.is_empty() {
        let _ = writeln!(out, "\nexports:");
        for (name, value) in &module.exports {
            let _ = writeln!(out, "  {} -> {}", name.index(), value.index());
        }
    }

    for (index, func) in module.functions.iter().enumerate() {
        let _ = writeln!(out, "\nfunction #{index} {}:", strings.get(func.name));
        let _ = writeln!(
            out,
            "  kind {} params {} locals {}",
            func.kind, func.params, func.locals
        );
        out.push_str(&dump_function(func));
    }

    out
}

/// Disassembles one function's code stream.
#[must_use]
pub fn dump_function(func: &BytecodeFunction) -> String {
    let mut out = String::new();
    let code = &func.code;
    let mut offset = 0usize;
    while offset < code.len() {
        let Some(op) = Opcode::from_repr(code[offset]) else {
            let _ = writeln!(out, "  {offset:6}: <invalid opcode {}>", code[offset]);
            offset += 1;
            continue;
        };
        let operand_text = render_operands(op, code, offset + 1);
        let name: &'static str = op.into();
        let _ = writeln!(out, "  {offset:6}: {name}{operand_text}");
        offset += op.encoded_len();
    }
    out
}

fn render_operands(op: Opcode, code: &[u8], offset: usize) -> String {
    match op.encoded_len() - 1 {
        0 => String::new(),
        4 => {
            let value = read_u32(code, offset);
            format!(" {value}")
        }
        8 if matches!(op, Opcode::LoadInt) => {
            let value = i64::from_le_bytes(read_8(code, offset));
            format!(" {value}")
        }
        8 if matches!(op, Opcode::LoadFloat) => {
            let value = f64::from_le_bytes(read_8(code, offset));
            let mut buffer = ryu::Buffer::new();
            format!(" {}", buffer.format(value))
        }
        8 => {
            let first = read_u32(code, offset);
            let second = read_u32(code, offset + 4);
            format!(" {first} {second}")
        }
        _ => unreachable!("unknown operand layout"),
    }
}

fn read_u32(code: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([code[offset], code[offset + 1], code[offset + 2], code[offset + 3]])
}

fn read_8(code: &[u8], offset: usize) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&code[offset..offset + 8]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::module::BytecodeFunctionKind;
    use crate::strings::InternedString;

    #[test]
    fn disassembles_operands() {
        let func = BytecodeFunction {
            name: InternedString::default(),
            kind: BytecodeFunctionKind::Normal,
            params: 0,
            locals: 1,
            code: {
                let mut code = vec![Opcode::LoadInt as u8];
                code.extend_from_slice(&42i64.to_le_bytes());
                code.push(Opcode::StoreLocal as u8);
                code.extend_from_slice(&0u32.to_le_bytes());
                code.push(Opcode::Ret as u8);
                code
            },
            handlers: Vec::new(),
        };
        let text = dump_function(&func);
        assert!(text.contains("LoadInt 42"));
        assert!(text.contains("StoreLocal 0"));
        assert!(text.contains("Ret"));
    }
}
