// SPDX-License-Identifier: GPL-3.0-only

macro_rules! id_gen {
    ($func_name:ident) => {
        pub(crate) fn $func_name() -> u64 {
            use std::sync::atomic::{AtomicU64, Ordering};
            static COUNTER: AtomicU64 = AtomicU64::new(1);
            COUNTER.fetch_add(1, Ordering::Relaxed)
        }
    };
}

pub(crate) use id_gen;
