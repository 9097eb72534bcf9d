//! Emulated process memory and virtual files written by macros.

use serde::Serialize;

/// Gap left between a relocated allocation and the highest existing region.
const RELOCATION_GAP: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryRegion {
    pub base: u64,
    pub data: Vec<u8>,
}

impl MemoryRegion {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn end(&self) -> u64 {
        self.base + self.size()
    }

    /// Inclusive of the end address, so a zero-length write at the end still lands here.
    fn contains(&self, address: u64) -> bool {
        self.base <= address && address <= self.end()
    }
}

/// Regions created by `VirtualAlloc` and written by `WriteProcessMemory`/`RtlCopyMemory`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryMap {
    regions: Vec<MemoryRegion>,
}

impl MemoryMap {
    /// Reserve a zero-filled region and return its base.
    ///
    /// A requested base that falls inside an existing region is moved past the highest
    /// existing region instead of overlapping it.
    pub fn alloc(&mut self, base: u64, size: u64) -> u64 {
        let base = if self.regions.iter().any(|r| r.contains(base)) {
            let top = self.regions.iter().map(MemoryRegion::end).max().unwrap_or(base);
            top + RELOCATION_GAP
        } else {
            base
        };
        self.regions.push(MemoryRegion {
            base,
            data: vec![0; size as usize],
        });
        log::debug!("allocated {size} bytes at {base:#x}");
        base
    }

    /// Copy `size` bytes of `data` to `base`. Fails without side effects unless a single
    /// region contains the whole `[base, base + size]` span.
    pub fn write(&mut self, base: u64, data: &[u8], size: u64) -> bool {
        if (data.len() as u64) < size {
            return false;
        }
        let Some(region) = self.regions.iter_mut().find(|r| r.contains(base)) else {
            return false;
        };
        let Some(end) = base.checked_add(size) else {
            return false;
        };
        if end > region.end() {
            return false;
        }
        let offset = (base - region.base) as usize;
        region.data[offset..offset + size as usize].copy_from_slice(&data[..size as usize]);
        true
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualFile {
    pub name: String,
    pub access: String,
    pub content: String,
}

/// Files opened with `FOPEN`, in open order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileTable {
    files: Vec<VirtualFile>,
}

impl FileTable {
    /// Open (or reuse) a file. Reopening keeps the existing content.
    pub fn open(&mut self, name: &str, access: &str) {
        if self.get(name).is_none() {
            self.files.push(VirtualFile {
                name: name.to_string(),
                access: access.to_string(),
                content: String::new(),
            });
        }
    }

    pub fn get(&self, name: &str) -> Option<&VirtualFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Append to an open file. Returns false when nothing is open under `name`.
    pub fn append(&mut self, name: &str, text: &str) -> bool {
        match self.files.iter_mut().find(|f| f.name == name) {
            Some(file) => {
                file.content.push_str(text);
                true
            }
            None => false,
        }
    }

    pub fn first_name(&self) -> Option<&str> {
        self.files.first().map(|f| f.name.as_str())
    }

    pub fn files(&self) -> &[VirtualFile] {
        &self.files
    }
}
