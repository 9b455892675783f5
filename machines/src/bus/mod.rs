//! Per-CPU bus controllers: each CPU owns its own address decode and
//! waitstate table, but both reach into the same main RAM, work RAM
//! allocation, VRAM banks, IPC block, and gamecard/interrupt state.
//!
//! A page-table-of-host-pointers fast path (refreshed whenever WRAMCNT or
//! the VRAM MST registers change) has no safe equivalent for a table that
//! aliases owned buffers, so decode here is address-range dispatch instead;
//! the VRAM mapper (`ppu::vram`) keeps its own page table for the hot path
//! since its banks don't alias CPU-owned memory.

pub mod a;
pub mod c;

pub use a::BusA;
pub use c::BusC;

/// IE/IF/IME interrupt-enable mask: the union of valid bits across IE's
/// per-byte field layout (0x003F3F7F).
pub const IE_MASK: u32 = 0x003F_3F7F;

/// Coarse memory regions used for the waitstate table, collapsing the
/// page-granular region axis down to the address-space buckets that
/// actually differ in access timing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Region {
    Bios,
    MainRam,
    Wram,
    Io,
    Palette,
    Vram,
    Oam,
    GamecardRom,
    GbaSlot,
    Unmapped,
}

/// Cycles charged for one access, keyed by (width, sequential) per region.
/// CPU timing fidelity is out of scope (the ARM core itself is a pluggable
/// seam — see `core::cpu::arm`), so these are representative rather than
/// bit-exact hardware values.
pub fn waitstates(region: Region, width: u8, sequential: bool) -> u64 {
    match region {
        Region::MainRam => if width == 32 { 8 } else { 9 },
        Region::Wram | Region::Bios | Region::Palette | Region::Vram | Region::Oam | Region::Io => 1,
        Region::GamecardRom => {
            let base = if sequential { 4 } else { 8 };
            if width == 32 { base * 2 } else { base }
        }
        Region::GbaSlot => if sequential { 6 } else { 10 },
        Region::Unmapped => 1,
    }
}
