//! Serializes modules for consumption outside the process: either the
//! versioned little-endian `KOBJ` object encoding or the textual IR
//! listing. Strings and sequences are length-prefixed; every scalar is
//! little-endian.

use std::io::{self, Write};
use std::path::Path;

use thiserror::Error;

use crate::ir::{InstKind, Module, Terminator};

const MAGIC: &[u8; 4] = b"KOBJ";
const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ObjCodeError {
    #[error("object writer error: {0}")]
    Io(#[from] io::Error),
}

type Result<T, E = ObjCodeError> = std::result::Result<T, E>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelocModel {
    Static,
    Pic,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileType {
    Object,
    Assembly,
}

/// Target description plus the data layout the code generator adopts
/// for modules headed to object files.
#[derive(Clone, Debug)]
pub struct ObjCodeWriter {
    triple: String,
    cpu: String,
    features: String,
    reloc: RelocModel,
}

impl ObjCodeWriter {
    /// A writer for the host target.
    pub fn host() -> ObjCodeWriter {
        let triple = format!(
            "{}-unknown-{}",
            std::env::consts::ARCH,
            std::env::consts::OS
        );
        ObjCodeWriter::with_target(triple, "generic", "", RelocModel::Pic)
    }

    pub fn with_target(
        triple: impl Into<String>,
        cpu: impl Into<String>,
        features: impl Into<String>,
        reloc: RelocModel,
    ) -> ObjCodeWriter {
        ObjCodeWriter {
            triple: triple.into(),
            cpu: cpu.into(),
            features: features.into(),
            reloc,
        }
    }

    pub fn triple(&self) -> &str {
        &self.triple
    }

    pub fn data_layout(&self) -> String {
        "e-m:e-i64:64-f80:128-n8:16:32:64-S128".to_string()
    }

    pub fn write_module_to_file(
        &self,
        path: impl AsRef<Path>,
        module: &Module,
        file_type: FileType,
    ) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        self.write_module_to_stream(&mut file, module, file_type)
    }

    pub fn write_module_to_stream(
        &self,
        w: &mut impl Write,
        module: &Module,
        file_type: FileType,
    ) -> Result<()> {
        match file_type {
            FileType::Assembly => Ok(write!(w, "{module}")?),
            FileType::Object => self.write_object(w, module),
        }
    }

    fn write_object(&self, w: &mut impl Write, module: &Module) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        write_str(w, &self.triple)?;
        write_str(w, &self.cpu)?;
        write_str(w, &self.features)?;
        w.write_all(&[match self.reloc {
            RelocModel::Static => 0u8,
            RelocModel::Pic => 1u8,
        }])?;
        write_str(w, &module.data_layout)?;
        write_str(w, &module.name)?;

        write_len(w, module.functions.len())?;
        for function in &module.functions {
            write_str(w, &function.name)?;
            write_len(w, function.params.len())?;
            for param in &function.params {
                write_str(w, param)?;
            }
            w.write_all(&[u8::from(!function.is_declaration())])?;
            if function.is_declaration() {
                continue;
            }

            write_len(w, function.insts.len())?;
            for inst in &function.insts {
                self.write_inst(w, &inst.kind)?;
            }
            write_len(w, function.blocks.len())?;
            for block in &function.blocks {
                write_str(w, &block.name)?;
                write_len(w, block.insts.len())?;
                for value in &block.insts {
                    w.write_all(&value.0.to_le_bytes())?;
                }
                self.write_terminator(w, block.terminator)?;
            }
        }
        Ok(())
    }

    fn write_inst(&self, w: &mut impl Write, kind: &InstKind) -> Result<()> {
        match kind {
            InstKind::Param(i) => {
                w.write_all(&[0u8])?;
                w.write_all(&i.to_le_bytes())?;
            }
            InstKind::ConstF64(v) => {
                w.write_all(&[1u8])?;
                w.write_all(&v.to_le_bytes())?;
            }
            InstKind::Alloca => w.write_all(&[2u8])?,
            InstKind::Load { slot } => {
                w.write_all(&[3u8])?;
                w.write_all(&slot.0.to_le_bytes())?;
            }
            InstKind::Store { slot, value } => {
                w.write_all(&[4u8])?;
                w.write_all(&slot.0.to_le_bytes())?;
                w.write_all(&value.0.to_le_bytes())?;
            }
            InstKind::FAdd { lhs, rhs } => self.write_binary(w, 5, *lhs, *rhs)?,
            InstKind::FSub { lhs, rhs } => self.write_binary(w, 6, *lhs, *rhs)?,
            InstKind::FMul { lhs, rhs } => self.write_binary(w, 7, *lhs, *rhs)?,
            InstKind::FDiv { lhs, rhs } => self.write_binary(w, 8, *lhs, *rhs)?,
            InstKind::FCmpUlt { lhs, rhs } => self.write_binary(w, 9, *lhs, *rhs)?,
            InstKind::FCmpOne { lhs, rhs } => self.write_binary(w, 10, *lhs, *rhs)?,
            InstKind::UiToFp { value } => {
                w.write_all(&[11u8])?;
                w.write_all(&value.0.to_le_bytes())?;
            }
            InstKind::Call { callee, args } => {
                w.write_all(&[12u8])?;
                write_str(w, callee)?;
                write_len(w, args.len())?;
                for arg in args {
                    w.write_all(&arg.0.to_le_bytes())?;
                }
            }
            InstKind::Phi { incoming } => {
                w.write_all(&[13u8])?;
                write_len(w, incoming.len())?;
                for (value, from) in incoming {
                    w.write_all(&value.0.to_le_bytes())?;
                    w.write_all(&from.0.to_le_bytes())?;
                }
            }
        }
        Ok(())
    }

    fn write_binary(
        &self,
        w: &mut impl Write,
        opcode: u8,
        lhs: crate::ir::ValueId,
        rhs: crate::ir::ValueId,
    ) -> Result<()> {
        w.write_all(&[opcode])?;
        w.write_all(&lhs.0.to_le_bytes())?;
        w.write_all(&rhs.0.to_le_bytes())?;
        Ok(())
    }

    fn write_terminator(&self, w: &mut impl Write, terminator: Option<Terminator>) -> Result<()> {
        match terminator {
            None => w.write_all(&[0u8])?,
            Some(Terminator::Br(target)) => {
                w.write_all(&[1u8])?;
                w.write_all(&target.0.to_le_bytes())?;
            }
            Some(Terminator::CondBr {
                cond,
                then_block,
                else_block,
            }) => {
                w.write_all(&[2u8])?;
                w.write_all(&cond.0.to_le_bytes())?;
                w.write_all(&then_block.0.to_le_bytes())?;
                w.write_all(&else_block.0.to_le_bytes())?;
            }
            Some(Terminator::Ret(value)) => {
                w.write_all(&[3u8])?;
                w.write_all(&value.0.to_le_bytes())?;
            }
        }
        Ok(())
    }
}

fn write_str(w: &mut impl Write, s: &str) -> Result<()> {
    write_len(w, s.len())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn write_len(w: &mut impl Write, len: usize) -> Result<()> {
    w.write_all(&(len as u32).to_le_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Function, Module};
    use pretty_assertions::assert_eq;

    fn sample_module() -> Module {
        let mut module = Module::new("unit");
        module.data_layout = ObjCodeWriter::host().data_layout();
        let func = module.add_function(Function::declaration("f", vec!["x".into()]));
        let mut builder = Builder::new();
        let entry = builder.create_block(&mut module, func, "entry");
        builder.position_at_end(func, entry);
        let x = module.func(func).param(0);
        let one = builder.const_f64(&mut module, 1.0);
        let sum = builder.fadd(&mut module, x, one, "addtmp");
        builder.ret(&mut module, sum);
        module
    }

    #[test]
    fn object_output_starts_with_magic_and_version() {
        let writer = ObjCodeWriter::host();
        let mut buf = Vec::new();
        writer
            .write_module_to_stream(&mut buf, &sample_module(), FileType::Object)
            .unwrap();
        assert_eq!(&buf[0..4], b"KOBJ");
        assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 1);
    }

    #[test]
    fn object_output_is_deterministic() {
        let writer = ObjCodeWriter::with_target(
            "x86_64-unknown-linux",
            "generic",
            "",
            RelocModel::Static,
        );
        let module = sample_module();
        let mut a = Vec::new();
        let mut b = Vec::new();
        writer
            .write_module_to_stream(&mut a, &module, FileType::Object)
            .unwrap();
        writer
            .write_module_to_stream(&mut b, &module, FileType::Object)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn assembly_output_is_the_listing() {
        let writer = ObjCodeWriter::host();
        let module = sample_module();
        let mut buf = Vec::new();
        writer
            .write_module_to_stream(&mut buf, &module, FileType::Assembly)
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), module.to_string());
    }

    #[test]
    fn triple_is_embedded() {
        let writer =
            ObjCodeWriter::with_target("riscv64-unknown-none", "rv64gc", "", RelocModel::Static);
        let mut buf = Vec::new();
        writer
            .write_module_to_stream(&mut buf, &sample_module(), FileType::Object)
            .unwrap();
        let triple = b"riscv64-unknown-none";
        assert!(buf
            .windows(triple.len())
            .any(|window| window == triple.as_slice()));
    }
}
