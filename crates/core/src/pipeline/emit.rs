use std::io::{self, Write};

use serde::Serialize;

use crate::config::OutputFormat;
use crate::model::{DecompilationResult, FunctionDescriptor};

/// Writes one block per function to the output stream, in call order.
pub struct Emitter<W: Write> {
    out: W,
    format: OutputFormat,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum RecordStatus {
    Ok,
    Empty,
    Failed,
    Missing,
}

#[derive(Debug, Serialize)]
struct Record<'a> {
    function: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<u64>,
    status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<W: Write> Emitter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    /// Emit the block for one decompiled function.
    pub fn emit(
        &mut self,
        function: &FunctionDescriptor,
        result: &DecompilationResult,
    ) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => self.emit_text(function, result),
            OutputFormat::JsonLines => {
                let (status, code, error) = match result {
                    DecompilationResult::Code(text) => (RecordStatus::Ok, Some(text.as_str()), None),
                    DecompilationResult::Empty => (RecordStatus::Empty, None, None),
                    DecompilationResult::Failed(cause) => {
                        (RecordStatus::Failed, None, Some(cause.as_str()))
                    }
                };
                self.write_record(&Record {
                    function: &function.name,
                    address: Some(function.address),
                    status,
                    code,
                    error,
                })
            }
        }?;
        // Streamed: consumers see each block as soon as it is produced.
        self.out.flush()
    }

    /// Emit the single diagnostic for a name filter that matched nothing.
    pub fn missing(&mut self, name: &str) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.out, "// No function named {name} found\n")?,
            OutputFormat::JsonLines => self.write_record(&Record {
                function: name,
                address: None,
                status: RecordStatus::Missing,
                code: None,
                error: None,
            })?,
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit_text(
        &mut self,
        function: &FunctionDescriptor,
        result: &DecompilationResult,
    ) -> io::Result<()> {
        match result {
            DecompilationResult::Code(text) => {
                self.out.write_all(text.as_bytes())?;
                if !text.ends_with('\n') {
                    self.out.write_all(b"\n")?;
                }
                self.out.write_all(b"\n")
            }
            DecompilationResult::Empty => {
                writeln!(self.out, "// No decompilation output for function {}\n", function.name)
            }
            DecompilationResult::Failed(cause) => {
                writeln!(self.out, "Exception thrown decompiling function {}: {cause}", function.name)
            }
        }
    }

    fn write_record(&mut self, record: &Record<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")
    }
}
