//! Stack unwinding of a stopped thread from its register state.
//!
//! Frames are unwound with the `.eh_frame` call frame information of the
//! module containing the pc. Code without CFI falls back to walking the frame
//! pointer chain.

use super::memory_mappings::ProcessModules;
use gimli::{BaseAddresses, CfaRule, EhFrame, NativeEndian, Register, RegisterRule, UnwindSection};
use log::trace;

/// Upper bound on the number of frames of a single stack.
pub const MAX_FRAMES: usize = 256;

/// The registers needed to find a frame and its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindRegs {
    pub pc: u64,
    pub sp: u64,
    pub fp: u64,
}

mod arch {
    use gimli::{Register, X86_64};

    pub const RA: Register = X86_64::RA;
    pub const SP: Register = X86_64::RSP;
    pub const FP: Register = X86_64::RBP;
    /// Saved frame pointer at `[fp]`, return address right above it.
    pub const RA_FROM_FP: u64 = 8;
}

/// Program counters of every frame, newest first.
pub fn walk_stack(
    modules: &ProcessModules,
    start: UnwindRegs,
    read_word: &mut dyn FnMut(u64) -> Option<u64>,
) -> Vec<u64> {
    let mut pcs = vec![start.pc];
    let mut regs = start;

    while pcs.len() < MAX_FRAMES {
        let is_newest = pcs.len() == 1;
        let Some(caller) = unwind_step(modules, &regs, is_newest, read_word) else {
            break;
        };
        // the stack grows down: a caller frame always sits above its callee
        if caller.pc == 0 || caller.sp <= regs.sp {
            break;
        }
        pcs.push(caller.pc);
        regs = caller;
    }

    pcs
}

fn unwind_step(
    modules: &ProcessModules,
    regs: &UnwindRegs,
    is_newest: bool,
    read_word: &mut dyn FnMut(u64) -> Option<u64>,
) -> Option<UnwindRegs> {
    match unwind_with_cfi(modules, regs, is_newest, read_word) {
        Some(CfiStep::Caller(caller)) => Some(caller),
        Some(CfiStep::Outermost) => None,
        None => unwind_with_frame_pointer(regs, read_word),
    }
}

enum CfiStep {
    Caller(UnwindRegs),
    /// The CFI marks the return address as undefined: this is the first frame.
    Outermost,
}

fn unwind_with_cfi(
    modules: &ProcessModules,
    regs: &UnwindRegs,
    is_newest: bool,
    read_word: &mut dyn FnMut(u64) -> Option<u64>,
) -> Option<CfiStep> {
    let module = modules.find(regs.pc)?;
    let Some(eh_frame_data) = module.image.eh_frame() else {
        trace!("No .eh_frame in {}", module.path.display());
        return None;
    };

    // Return addresses point after the call; look up the call itself.
    let lookup_pc = if is_newest { regs.pc } else { regs.pc - 1 };

    let eh_frame = EhFrame::new(&eh_frame_data.data, NativeEndian);
    let bases = BaseAddresses::default()
        .set_eh_frame(eh_frame_data.svma)
        .set_text(module.image.text_svma());
    let mut ctx = gimli::UnwindContext::new();
    let row = eh_frame
        .unwind_info_for_address(
            &bases,
            &mut ctx,
            module.svma(lookup_pc),
            EhFrame::cie_from_offset,
        )
        .ok()?;

    let cfa = match row.cfa() {
        CfaRule::RegisterAndOffset { register, offset } => {
            register_value(regs, *register)?.wrapping_add_signed(*offset)
        }
        _ => return None,
    };

    let pc = match row.register(arch::RA) {
        RegisterRule::Offset(offset) => read_word(cfa.wrapping_add_signed(offset))?,
        RegisterRule::Undefined => return Some(CfiStep::Outermost),
        _ => return None,
    };

    let fp = match row.register(arch::FP) {
        RegisterRule::Offset(offset) => read_word(cfa.wrapping_add_signed(offset))?,
        _ => regs.fp,
    };

    Some(CfiStep::Caller(UnwindRegs { pc, sp: cfa, fp }))
}

fn register_value(regs: &UnwindRegs, register: Register) -> Option<u64> {
    if register == arch::SP {
        Some(regs.sp)
    } else if register == arch::FP {
        Some(regs.fp)
    } else {
        None
    }
}

fn unwind_with_frame_pointer(
    regs: &UnwindRegs,
    read_word: &mut dyn FnMut(u64) -> Option<u64>,
) -> Option<UnwindRegs> {
    if regs.fp == 0 {
        return None;
    }

    let saved_fp = read_word(regs.fp)?;
    let pc = read_word(regs.fp + arch::RA_FROM_FP)?;
    Some(UnwindRegs {
        pc,
        sp: regs.fp + arch::RA_FROM_FP + 8,
        fp: saved_fp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::live::test_support::marker_address;
    use std::collections::HashMap;

    /// A stack laid out as a frame pointer chain: main -> worker -> blocked.
    fn memory() -> HashMap<u64, u64> {
        HashMap::from([
            // blocked frame: fp = 0x7000
            (0x7000, 0x7100),
            (0x7008, 0x40_1234),
            // worker frame: fp = 0x7100
            (0x7100, 0x7200),
            (0x7108, 0x40_5678),
            // main frame: fp = 0x7200, end of chain
            (0x7200, 0),
            (0x7208, 0),
        ])
    }

    #[test]
    fn test_frame_pointer_chain() {
        let memory = memory();
        let mut read_word = |addr: u64| memory.get(&addr).copied();
        let start = UnwindRegs {
            pc: 0x40_0010,
            sp: 0x6f00,
            fp: 0x7000,
        };

        let pcs = walk_stack(&ProcessModules::default(), start, &mut read_word);
        assert_eq!(pcs, vec![0x40_0010, 0x40_1234, 0x40_5678]);
    }

    #[test]
    fn test_cfi_at_function_entry() {
        let modules = ProcessModules::load(std::process::id() as i32).unwrap();
        let marker = marker_address();

        // On entry the return address sits at the stack pointer and there is
        // no frame pointer to fall back on.
        let memory = HashMap::from([(0x7ff0_0000_u64, 0x1234_5678_u64)]);
        let mut read_word = |addr: u64| memory.get(&addr).copied();
        let start = UnwindRegs {
            pc: marker,
            sp: 0x7ff0_0000,
            fp: 0,
        };

        let Some(CfiStep::Caller(caller)) = unwind_with_cfi(&modules, &start, true, &mut read_word)
        else {
            panic!("no CFI row for {marker:#x}");
        };
        assert_eq!(
            caller,
            UnwindRegs {
                pc: 0x1234_5678,
                sp: 0x7ff0_0008,
                fp: 0,
            }
        );

        let pcs = walk_stack(&modules, start, &mut read_word);
        assert_eq!(pcs, vec![marker, 0x1234_5678]);
    }

    #[test]
    fn test_stops_on_unreadable_memory() {
        let mut read_word = |_addr: u64| -> Option<u64> { None };
        let start = UnwindRegs {
            pc: 0x40_0010,
            sp: 0x6f00,
            fp: 0x7000,
        };

        let pcs = walk_stack(&ProcessModules::default(), start, &mut read_word);
        assert_eq!(pcs, vec![0x40_0010]);
    }

    #[test]
    fn test_stops_on_looping_chain() {
        // a frame pointer that points to itself must not loop forever
        let memory = HashMap::from([(0x7000_u64, 0x7000_u64), (0x7008, 0x40_1234)]);
        let mut read_word = |addr: u64| memory.get(&addr).copied();
        let start = UnwindRegs {
            pc: 0x40_0010,
            sp: 0x6f00,
            fp: 0x7000,
        };

        let pcs = walk_stack(&ProcessModules::default(), start, &mut read_word);
        assert_eq!(pcs, vec![0x40_0010, 0x40_1234]);
    }
}
