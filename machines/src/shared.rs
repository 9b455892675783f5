//! State visible to both CPU bus controllers: main RAM, switchable work RAM,
//! input latches, and the scheduler. Both buses, the PPU, and every
//! peripheral hold a reference to one shared instance rather than
//! duplicating this state.

use crate::scheduler::{EventKind, Scheduler};

pub const PSRAM_SIZE: usize = 4 * 1024 * 1024;
pub const WRAM_SIZE: usize = 32 * 1024;

pub struct Shared {
    pub psram: Vec<u8>,
    pub wram: Vec<u8>,

    /// 10 main buttons, inverted (0 = pressed).
    pub keyinput: u16,
    /// CPU-A key interrupt control.
    pub keycnt9: u16,
    /// CPU-C key interrupt control.
    pub keycnt7: u16,
    /// 2 extra buttons (X/Y + debug/pen), inverted.
    pub extkeyin: u16,
    /// External memory (GBA slot / NDS slot) CPU ownership bits.
    pub exmemcnt: u16,
    /// 2-bit work-RAM allocation selector.
    pub wramcnt: u8,

    pub scheduler: Scheduler,
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    pub fn new() -> Self {
        Shared {
            psram: vec![0; PSRAM_SIZE],
            wram: vec![0; WRAM_SIZE],
            keyinput: 0x03FF,
            keycnt9: 0,
            keycnt7: 0,
            extkeyin: 0x007F & !0x0040, // bit 6 (lid closed) forced low, rest inverted-high
            exmemcnt: 0,
            wramcnt: 3,
            scheduler: Scheduler::new(),
        }
    }

    pub fn reset(&mut self) {
        self.psram.iter_mut().for_each(|b| *b = 0);
        self.wram.iter_mut().for_each(|b| *b = 0);
        self.keyinput = 0x03FF;
        self.keycnt9 = 0;
        self.keycnt7 = 0;
        self.extkeyin = 0x007F & !0x0040;
        self.exmemcnt = 0;
        self.wramcnt = 3;
        self.scheduler.reset();
    }

    pub fn set_key(&mut self, main_bit: Option<u8>, extra_bit: Option<u8>, pressed: bool) {
        if let Some(bit) = main_bit {
            if pressed {
                self.keyinput &= !(1 << bit);
            } else {
                self.keyinput |= 1 << bit;
            }
        }
        if let Some(bit) = extra_bit {
            if pressed {
                self.extkeyin &= !(1 << bit);
            } else {
                self.extkeyin |= 1 << bit;
            }
        }
    }

    /// Shared I/O register reads common to both CPUs (address is the full
    /// 32-bit I/O address so callers can match on the canonical offset).
    pub fn read_io(&self, address: u32) -> u8 {
        match address & 0x0FFF_FFFF {
            0x0400_0130 => (self.keyinput & 0xFF) as u8,
            0x0400_0131 => (self.keyinput >> 8) as u8,
            0x0400_0136 => (self.extkeyin & 0xFF) as u8,
            0x0400_0137 => (self.extkeyin >> 8) as u8,
            0x0400_0247 => self.wramcnt,
            0x0400_0204 => (self.exmemcnt & 0xFF) as u8,
            0x0400_0205 => (self.exmemcnt >> 8) as u8,
            _ => {
                log::warn!("shared: unknown I/O read at {address:#010X}");
                0
            }
        }
    }

    pub fn write_io(&mut self, address: u32, value: u8) {
        match address & 0x0FFF_FFFF {
            0x0400_0132 => self.keycnt9 = (self.keycnt9 & 0xFF00) | value as u16,
            0x0400_0133 => self.keycnt9 = (self.keycnt9 & 0x00FF) | ((value as u16) << 8),
            0x0400_0247 => {
                self.wramcnt = value & 0x3;
                self.scheduler.schedule(0, EventKind::RefreshWramPages);
            }
            0x0400_0204 => self.exmemcnt = (self.exmemcnt & 0xFF00) | value as u16,
            0x0400_0205 => self.exmemcnt = (self.exmemcnt & 0x00FF) | ((value as u16) << 8),
            _ => log::warn!("shared: unknown I/O write at {address:#010X} = {value:#04X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wramcnt_write_schedules_refresh() {
        let mut shared = Shared::new();
        shared.write_io(0x0400_0247, 2);
        assert_eq!(shared.wramcnt, 2);
        let kind = shared.scheduler.pop_ready();
        assert_eq!(kind, Some(EventKind::RefreshWramPages));
    }

    #[test]
    fn set_key_clears_bit_on_press() {
        let mut shared = Shared::new();
        assert_eq!(shared.keyinput & 1, 1);
        shared.set_key(Some(0), None, true);
        assert_eq!(shared.keyinput & 1, 0);
        shared.set_key(Some(0), None, false);
        assert_eq!(shared.keyinput & 1, 1);
    }
}
