use super::elf_helper;
use super::symbols::ModuleImage;
use crate::prelude::*;
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// One executable mapping of an ELF file in the target.
#[derive(Debug)]
pub struct MappedModule {
    pub path: PathBuf,
    pub avma_range: Range<u64>,
    pub load_bias: u64,
    pub image: Rc<ModuleImage>,
}

impl MappedModule {
    /// Translate a runtime address into the module's file addresses.
    pub fn svma(&self, avma: u64) -> u64 {
        avma.wrapping_sub(self.load_bias)
    }
}

/// Executable modules of a process, used to symbolize and unwind its stacks.
#[derive(Debug, Default)]
pub struct ProcessModules {
    modules: Vec<MappedModule>,
}

impl ProcessModules {
    pub fn from_modules(mut modules: Vec<MappedModule>) -> Self {
        modules.sort_by_key(|module| module.avma_range.start);
        Self { modules }
    }

    /// Read `/proc/<pid>/maps` and load symbols and unwind information of
    /// every executable file mapping. Modules that cannot be parsed are
    /// skipped; their frames stay unnamed.
    pub fn load(pid: i32) -> Result<Self> {
        use procfs::process::{MMPermissions, MMapPath};

        let process = procfs::process::Process::new(pid)
            .with_context(|| format!("Failed to find process {pid}"))?;
        let maps = process
            .maps()
            .with_context(|| format!("Failed to read /proc/{pid}/maps"))?;

        let mut images: HashMap<PathBuf, Option<LoadedFile>> = HashMap::new();
        let mut modules = Vec::new();

        for map in maps.iter().sorted_by_key(|map| map.address.0) {
            let (start_addr, end_addr) = map.address;
            if !map.perms.contains(MMPermissions::EXECUTE) {
                continue;
            }
            let MMapPath::Path(path) = &map.pathname else {
                trace!("Skipping executable mapping without path: {start_addr:x} - {end_addr:x}");
                continue;
            };

            let loaded = images
                .entry(path.clone())
                .or_insert_with(|| match LoadedFile::open(path) {
                    Ok(loaded) => Some(loaded),
                    Err(error) => {
                        debug!("Failed to load module {path:?}: {error:#}");
                        None
                    }
                });
            let Some(loaded) = loaded else {
                continue;
            };

            match loaded.load_bias(start_addr, end_addr, map.offset) {
                Ok(load_bias) => {
                    debug!("Added module {path:?} ({start_addr:x} - {end_addr:x}, bias {load_bias:x})");
                    modules.push(MappedModule {
                        path: path.clone(),
                        avma_range: start_addr..end_addr,
                        load_bias,
                        image: loaded.image.clone(),
                    });
                }
                Err(error) => {
                    debug!("Failed to compute load bias for {path:?}: {error:#}");
                }
            }
        }

        Ok(Self::from_modules(modules))
    }

    pub fn find(&self, avma: u64) -> Option<&MappedModule> {
        let index = self
            .modules
            .partition_point(|module| module.avma_range.start <= avma);
        let module = self.modules.get(index.checked_sub(1)?)?;
        module.avma_range.contains(&avma).then_some(module)
    }

    /// Name of the function containing the runtime address `avma`.
    pub fn symbolize(&self, avma: u64) -> Option<&str> {
        let module = self.find(avma)?;
        module
            .image
            .symbol_for(module.svma(avma))
            .map(|symbol| symbol.name.as_str())
    }
}

/// An ELF file mapped into our own address space, kept around while its
/// mappings in the target are resolved.
struct LoadedFile {
    mmap: memmap2::Mmap,
    image: Rc<ModuleImage>,
}

impl LoadedFile {
    fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Could not open file {}", path.display()))?;
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };
        let object = object::File::parse(&mmap[..])?;
        let image = Rc::new(ModuleImage::parse(&object));
        trace!(
            "Parsed {} symbols from {}",
            image.symbols().len(),
            path.display()
        );
        Ok(Self { mmap, image })
    }

    fn load_bias(&self, start_addr: u64, end_addr: u64, file_offset: u64) -> Result<u64> {
        let object = object::File::parse(&self.mmap[..])?;
        elf_helper::compute_load_bias(start_addr, end_addr, file_offset, &object)
    }
}
