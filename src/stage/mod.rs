mod dataplane;
pub mod stage1;
pub mod stage2;
pub mod stage3;

use std::ffi::OsString;

use crate::sys::reexec::{STAGE2_SENTINEL, STAGE3_SENTINEL};

/// The first positional argument of `/proc/self/exe` selects the stage;
/// any value other than the two sentinels means "this is stage 1" (spec.md
/// section 6, "Re-exec argv convention").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Stage1,
    Stage2,
    Stage3,
}

impl Stage {
    pub fn detect(args: &[OsString]) -> Stage {
        match args.first().and_then(|a| a.to_str()) {
            Some(STAGE2_SENTINEL) => Stage::Stage2,
            Some(STAGE3_SENTINEL) => Stage::Stage3,
            _ => Stage::Stage1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_first_arg_is_stage1() {
        assert_eq!(Stage::detect(&["/bin/sh".into()]), Stage::Stage1);
        assert_eq!(Stage::detect(&[]), Stage::Stage1);
    }

    #[test]
    fn sentinels_select_stage() {
        assert_eq!(Stage::detect(&["stage2".into()]), Stage::Stage2);
        assert_eq!(Stage::detect(&["stage3".into()]), Stage::Stage3);
    }
}
