//! Based on this: https://github.com/mstange/samply/blob/4a5afec57b7c68b37ecde12b5a258de523e89463/samply/src/linux_shared/svma_file_range.rs#L8

use anyhow::Context;
use object::{Object, ObjectSegment};

/// A `PT_LOAD` segment: where it lives in the file and where the ELF file
/// asks for it to be mapped (its stated virtual memory address).
struct LoadSegment {
    svma: u64,
    file_offset: u64,
    size: u64,
}

impl LoadSegment {
    fn from_segment<'data, S: ObjectSegment<'data>>(segment: S) -> Self {
        let (file_offset, size) = segment.file_range();
        LoadSegment {
            svma: segment.address(),
            file_offset,
            size,
        }
    }

    /// The kernel maps whole pages, so a mapping may either sit inside the
    /// segment's file range or cover it entirely.
    fn overlaps_mapping(&self, mapping_file_offset: u64, mapping_size: u64) -> bool {
        let segment_end = self.file_offset + self.size;
        let mapping_end = mapping_file_offset + mapping_size;

        let mapping_inside = self.file_offset <= mapping_file_offset && mapping_end <= segment_end;
        let segment_inside = mapping_file_offset <= self.file_offset && segment_end <= mapping_end;
        mapping_inside || segment_inside
    }
}

/// Difference between where a module's code is mapped in the target and
/// where its ELF file placed it. Subtracting it from a runtime address yields
/// an address comparable with the file's symbol table and `.eh_frame`.
///
/// Zero for non-PIE executables, the randomized base for PIE executables and
/// shared objects.
pub fn compute_load_bias(
    runtime_start_addr: u64,
    runtime_end_addr: u64,
    runtime_file_offset: u64,
    object: &object::File,
) -> anyhow::Result<u64> {
    let mapping_size = runtime_end_addr - runtime_start_addr;
    let segment = object
        .segments()
        .map(LoadSegment::from_segment)
        .find(|segment| segment.overlaps_mapping(runtime_file_offset, mapping_size))
        .with_context(|| {
            format!(
                "Could not find a segment overlapping the file offset range 0x{:x}..0x{:x}",
                runtime_file_offset,
                runtime_file_offset + mapping_size
            )
        })?;

    // Runtime address of the segment's first byte.
    let segment_runtime_addr = if segment.file_offset > runtime_file_offset {
        runtime_start_addr + (segment.file_offset - runtime_file_offset)
    } else {
        runtime_start_addr - (runtime_file_offset - segment.file_offset)
    };

    Ok(segment_runtime_addr.wrapping_sub(segment.svma))
}
