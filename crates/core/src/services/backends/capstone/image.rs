use std::collections::HashMap;

use goblin::{elf, mach, pe, Object};

use crate::services::analysis::EngineError;

/// Mach-O `S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS`.
const MACH_SECTION_CODE: u32 = 0x8000_0400;

/// Sections holding import trampolines.
const STUB_SECTIONS: &[&str] = &[".plt", ".plt.sec", ".plt.got", "__stubs", "__auth_stubs"];

/// Size of one x86 PLT entry.
const PLT_ENTRY_SIZE: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arch {
    X86,
    X86_64,
    Arm,
    Arm64,
}

impl Arch {
    pub(crate) fn pointer_size(self) -> usize {
        match self {
            Arch::X86 | Arch::Arm => 4,
            Arch::X86_64 | Arch::Arm64 => 8,
        }
    }

    pub(crate) fn is_x86(self) -> bool {
        matches!(self, Arch::X86 | Arch::X86_64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    Elf,
    Pe,
    MachO,
}

#[derive(Debug, Clone)]
pub(crate) struct SectionRange {
    pub name: String,
    pub start: u64,
    pub end: u64,
    pub file_offset: Option<usize>,
    pub size: Option<usize>,
    pub executable: bool,
}

impl SectionRange {
    pub(crate) fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    pub(crate) fn is_stub_section(&self) -> bool {
        STUB_SECTIONS.contains(&self.name.as_str())
    }

    /// File range backing `[addr, addr + len)`, clamped to the section and the image.
    fn file_range(&self, addr: u64, len: usize, bytes_len: usize) -> Option<(usize, usize)> {
        let file_offset = self.file_offset?;
        let size = self.size? as u64;
        if !self.contains(addr) {
            return None;
        }
        let offset_in_section = addr - self.start;
        if offset_in_section >= size {
            return None;
        }
        let start = file_offset.checked_add(offset_in_section as usize)?;
        if start >= bytes_len {
            return None;
        }
        let available = (size - offset_in_section) as usize;
        let end = start.saturating_add(len.min(available)).min(bytes_len);
        (end > start).then_some((start, end))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SymbolInfo {
    pub name: String,
    pub address: u64,
}

/// Parsed view of an executable: sections, symbols and import plumbing.
#[derive(Debug)]
pub(crate) struct ImageLayout {
    pub bytes: Vec<u8>,
    pub format: Format,
    pub arch: Arch,
    pub entry: Option<u64>,
    pub sections: Vec<SectionRange>,
    /// Defined function symbols.
    pub symbols: Vec<SymbolInfo>,
    /// Named import trampolines.
    pub plt_entries: Vec<SymbolInfo>,
    /// Imported functions resolved at load time, in table order.
    pub imports: Vec<String>,
    /// Pointer slot (GOT/IAT entry) -> imported function name.
    pub import_slots: HashMap<u64, String>,
}

impl ImageLayout {
    pub(crate) fn parse(bytes: Vec<u8>) -> Result<Self, EngineError> {
        let object = Object::parse(&bytes)
            .map_err(|e| EngineError::Load(format!("unrecognized executable format: {e}")))?;
        let parsed = match object {
            Object::Elf(elf) => parse_elf(&elf)?,
            Object::PE(pe) => parse_pe(&pe)?,
            Object::Mach(mach::Mach::Binary(bin)) => parse_macho(&bin)?,
            Object::Mach(mach::Mach::Fat(_)) => {
                return Err(EngineError::Load(
                    "universal (fat) Mach-O images are not supported; extract one slice".into(),
                ))
            }
            _ => {
                return Err(EngineError::Load(
                    "not an ELF, PE or Mach-O executable image".into(),
                ))
            }
        };
        Ok(Self { bytes, ..parsed })
    }

    /// Executable, file-backed section containing `addr`.
    pub(crate) fn code_section(&self, addr: u64) -> Option<&SectionRange> {
        self.sections.iter().find(|s| s.executable && s.file_offset.is_some() && s.contains(addr))
    }

    /// Non-executable section containing `addr`.
    pub(crate) fn data_section(&self, addr: u64) -> Option<&SectionRange> {
        self.sections.iter().find(|s| !s.executable && s.contains(addr))
    }

    pub(crate) fn is_stub(&self, addr: u64) -> bool {
        self.sections.iter().any(|s| s.is_stub_section() && s.contains(addr))
    }

    /// Up to `len` code bytes starting at `addr`.
    pub(crate) fn code_bytes(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let section = self.code_section(addr)?;
        let (start, end) = section.file_range(addr, len, self.bytes.len())?;
        Some(&self.bytes[start..end])
    }

    /// Bytes of any file-backed section at `addr`.
    pub(crate) fn bytes_at(&self, addr: u64, len: usize) -> Option<&[u8]> {
        self.sections.iter().find_map(|s| {
            let (start, end) = s.file_range(addr, len, self.bytes.len())?;
            Some(&self.bytes[start..end])
        })
    }

    /// Little-endian pointer stored at `addr`, if the slot is file-backed and non-null.
    pub(crate) fn read_pointer(&self, addr: u64) -> Option<u64> {
        let size = self.arch.pointer_size();
        let raw = self.bytes_at(addr, size)?;
        if raw.len() < size {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(raw);
        let value = u64::from_le_bytes(buf);
        (value != 0).then_some(value)
    }

    /// Printable C string at `addr`, used to annotate data references.
    pub(crate) fn preview_string(&self, addr: u64) -> Option<String> {
        let raw = self.bytes_at(addr, 64)?;
        let text: Vec<u8> = raw.iter().copied().take_while(|b| *b != 0).collect();
        if text.len() < 2 || text.len() == raw.len() {
            return None;
        }
        if !text.iter().all(|b| b.is_ascii_graphic() || *b == b' ' || *b == b'\n' || *b == b'\t') {
            return None;
        }
        Some(String::from_utf8_lossy(&text).escape_default().to_string())
    }

    /// First page past every section; synthetic extern functions live here.
    /// `None` when the sections reach the top of the address space.
    pub(crate) fn extern_base(&self) -> Option<u64> {
        let end = self.sections.iter().map(|s| s.end).max().unwrap_or(0);
        end.checked_add(0xfff).map(|e| e & !0xfff)
    }
}

pub(crate) fn empty_layout(format: Format, arch: Arch) -> ImageLayout {
    ImageLayout {
        bytes: Vec::new(),
        format,
        arch,
        entry: None,
        sections: Vec::new(),
        symbols: Vec::new(),
        plt_entries: Vec::new(),
        imports: Vec::new(),
        import_slots: HashMap::new(),
    }
}

fn parse_elf(elf: &elf::Elf) -> Result<ImageLayout, EngineError> {
    if !elf.little_endian {
        return Err(EngineError::Load("big-endian ELF images are not supported".into()));
    }
    let arch = match elf.header.e_machine {
        elf::header::EM_X86_64 => Arch::X86_64,
        elf::header::EM_386 => Arch::X86,
        elf::header::EM_AARCH64 => Arch::Arm64,
        elf::header::EM_ARM => Arch::Arm,
        other => {
            return Err(EngineError::Load(format!("unsupported ELF machine type {other}")));
        }
    };
    let mut layout = empty_layout(Format::Elf, arch);

    // Relocatable objects leave every section at address 0; place each one at its
    // file offset so addresses stay unique.
    let relocatable = elf.header.e_type == elf::header::ET_REL;
    let mut section_bases = Vec::with_capacity(elf.section_headers.len());
    for sh in &elf.section_headers {
        let base = if relocatable { sh.sh_offset } else { sh.sh_addr };
        section_bases.push(base);
        if sh.sh_flags & u64::from(elf::section_header::SHF_ALLOC) == 0 {
            continue;
        }
        let nobits = sh.sh_type == elf::section_header::SHT_NOBITS;
        layout.sections.push(SectionRange {
            name: elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string(),
            start: base,
            end: base.saturating_add(sh.sh_size),
            file_offset: (!nobits).then_some(sh.sh_offset as usize),
            size: (!nobits).then_some(sh.sh_size as usize),
            executable: sh.sh_flags & u64::from(elf::section_header::SHF_EXECINSTR) != 0,
        });
    }

    let mut push_defined = |name: &str, sym: &elf::Sym| {
        if name.is_empty() || !sym.is_function() {
            return;
        }
        let shndx = sym.st_shndx;
        if shndx == elf::section_header::SHN_UNDEF as usize {
            return;
        }
        let base = if relocatable { section_bases.get(shndx).copied().unwrap_or(0) } else { 0 };
        let address = base.saturating_add(sym.st_value);
        if layout.symbols.iter().any(|s| s.address == address && s.name == name) {
            return;
        }
        layout.symbols.push(SymbolInfo { name: name.to_string(), address });
    };
    for sym in &elf.syms {
        push_defined(elf.strtab.get_at(sym.st_name).unwrap_or(""), &sym);
    }
    for sym in &elf.dynsyms {
        push_defined(elf.dynstrtab.get_at(sym.st_name).unwrap_or(""), &sym);
    }

    let dyn_name = |index: usize| -> Option<(String, bool)> {
        let sym = elf.dynsyms.get(index)?;
        let name = elf.dynstrtab.get_at(sym.st_name)?;
        if name.is_empty() {
            return None;
        }
        Some((name.to_string(), sym.st_shndx == elf::section_header::SHN_UNDEF as usize))
    };

    for sym in &elf.dynsyms {
        let name = elf.dynstrtab.get_at(sym.st_name).unwrap_or("");
        if !name.is_empty()
            && sym.is_function()
            && sym.st_shndx == elf::section_header::SHN_UNDEF as usize
            && !layout.imports.iter().any(|i| i == name)
        {
            layout.imports.push(name.to_string());
        }
    }

    let mut plt_names = Vec::new();
    for reloc in elf.pltrelocs.iter() {
        if let Some((name, _)) = dyn_name(reloc.r_sym) {
            layout.import_slots.insert(reloc.r_offset, name.clone());
            plt_names.push(name);
        }
    }
    for reloc in elf.dynrelas.iter().chain(elf.dynrels.iter()) {
        if reloc.r_sym == 0 {
            continue;
        }
        if let Some((name, true)) = dyn_name(reloc.r_sym) {
            layout.import_slots.entry(reloc.r_offset).or_insert(name);
        }
    }

    if arch.is_x86() {
        let find = |name: &str| layout.sections.iter().find(|s| s.name == name).map(|s| s.start);
        // With IBT the jumps live in .plt.sec; otherwise .plt starts with the resolver stub.
        let first_entry = find(".plt.sec").or_else(|| find(".plt").map(|s| s + PLT_ENTRY_SIZE));
        if let Some(first) = first_entry {
            layout.plt_entries = plt_names
                .into_iter()
                .enumerate()
                .map(|(idx, name)| SymbolInfo {
                    name,
                    address: first + idx as u64 * PLT_ENTRY_SIZE,
                })
                .collect();
        }
    }

    layout.entry = (elf.entry != 0).then_some(elf.entry);
    Ok(layout)
}

fn parse_pe(pe: &pe::PE) -> Result<ImageLayout, EngineError> {
    let arch = match pe.header.coff_header.machine {
        pe::header::COFF_MACHINE_X86 => Arch::X86,
        pe::header::COFF_MACHINE_X86_64 => Arch::X86_64,
        pe::header::COFF_MACHINE_ARM64 => Arch::Arm64,
        other => {
            return Err(EngineError::Load(format!("unsupported PE machine type 0x{other:x}")));
        }
    };
    let mut layout = empty_layout(Format::Pe, arch);
    let image_base = pe.image_base as u64;

    for sec in &pe.sections {
        let start = image_base.saturating_add(u64::from(sec.virtual_address));
        let size = if sec.virtual_size == 0 { sec.size_of_raw_data } else { sec.virtual_size };
        layout.sections.push(SectionRange {
            name: sec.name().unwrap_or_default().to_string(),
            start,
            end: start.saturating_add(u64::from(size)),
            file_offset: (sec.size_of_raw_data > 0).then_some(sec.pointer_to_raw_data as usize),
            size: (sec.size_of_raw_data > 0).then_some(sec.size_of_raw_data as usize),
            executable: sec.characteristics & pe::section_table::IMAGE_SCN_MEM_EXECUTE != 0,
        });
    }

    for exp in &pe.exports {
        if exp.rva == 0 {
            continue;
        }
        let name = exp.name.unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        layout.symbols.push(SymbolInfo {
            name: name.to_string(),
            address: image_base.saturating_add(exp.rva as u64),
        });
    }

    for import in &pe.imports {
        let name = import.name.to_string();
        layout.import_slots.insert(image_base.saturating_add(import.rva as u64), name.clone());
        if !layout.imports.contains(&name) {
            layout.imports.push(name);
        }
    }

    layout.entry = (pe.entry != 0).then_some(image_base.saturating_add(pe.entry as u64));
    Ok(layout)
}

fn parse_macho(bin: &mach::MachO) -> Result<ImageLayout, EngineError> {
    if !bin.little_endian {
        return Err(EngineError::Load("big-endian Mach-O images are not supported".into()));
    }
    let arch = match bin.header.cputype() {
        mach::cputype::CPU_TYPE_X86 => Arch::X86,
        mach::cputype::CPU_TYPE_X86_64 => Arch::X86_64,
        mach::cputype::CPU_TYPE_ARM => Arch::Arm,
        mach::cputype::CPU_TYPE_ARM64 => Arch::Arm64,
        other => {
            return Err(EngineError::Load(format!("unsupported Mach-O cpu type {other}")));
        }
    };
    let mut layout = empty_layout(Format::MachO, arch);

    for (sec, _) in bin.segments.sections().flatten().filter_map(Result::ok) {
        let zerofill = sec.offset == 0;
        layout.sections.push(SectionRange {
            name: sec.name().unwrap_or("").to_string(),
            start: sec.addr,
            end: sec.addr.saturating_add(sec.size),
            file_offset: (!zerofill).then_some(sec.offset as usize),
            size: (!zerofill).then_some(sec.size as usize),
            executable: sec.flags & MACH_SECTION_CODE != 0,
        });
    }

    for sym in bin.symbols() {
        let Ok((name, nlist)) = sym else { continue };
        let name = name.trim_start_matches('_');
        if name.is_empty() {
            continue;
        }
        if nlist.is_undefined() {
            if !layout.imports.iter().any(|i| i == name) {
                layout.imports.push(name.to_string());
            }
            continue;
        }
        if nlist.n_value == 0 || nlist.is_stab() {
            continue;
        }
        let in_code = layout.sections.iter().any(|s| s.executable && s.contains(nlist.n_value));
        if in_code && !layout.symbols.iter().any(|s| s.address == nlist.n_value) {
            layout.symbols.push(SymbolInfo { name: name.to_string(), address: nlist.n_value });
        }
    }

    // LC_MAIN records a file offset; LC_UNIXTHREAD records an address.
    if bin.entry != 0 {
        let entry = bin.entry;
        let from_offset = layout.sections.iter().find_map(|s| {
            let offset = s.file_offset? as u64;
            let size = s.size? as u64;
            (s.executable && entry >= offset && entry < offset.saturating_add(size))
                .then(|| s.start.saturating_add(entry - offset))
        });
        layout.entry = from_offset.or(Some(entry));
    }
    Ok(layout)
}
