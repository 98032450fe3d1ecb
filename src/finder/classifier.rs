use crate::prelude::*;
use crate::target::StackWalker;

/// The frame a thread is considered blocked in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingSite<F> {
    pub frame: F,
    pub function: String,
}

/// Find the outermost frame of the current thread whose function is a known
/// blocking function.
///
/// Blocking functions call each other (a rwlock acquire ends up in a futex
/// wrapper), so the whole stack is walked and the last match wins: it is the
/// call the application itself made.
pub fn classify<W>(walker: &mut W, is_blocking: impl Fn(&str) -> bool) -> Option<BlockingSite<W::Frame>>
where
    W: StackWalker + ?Sized,
{
    let mut outermost = None;
    let mut next = walker.newest_frame();

    while let Some(frame) = next {
        if let Some(function) = walker.frame_name(&frame) {
            if is_blocking(&function) {
                trace!("Blocking frame candidate: {function}");
                outermost = Some(BlockingSite {
                    frame: frame.clone(),
                    function,
                });
            }
        }
        next = walker.older(&frame);
    }

    outermost
}
