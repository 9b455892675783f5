//! CPU-C (ARM7-class co-processor) bus controller. CPU-C owns the RTC, SPI
//! (power/firmware/touchscreen), and audio mixer register windows outright,
//! and reaches into main RAM, work RAM, IPC, and gamecard state through the
//! same reference-counted cells as `BusA`.

use std::cell::RefCell;
use std::rc::Rc;

use nds_core::core::bus::{Bus, BusMaster, InterruptState};

use crate::apu::Apu;
use crate::dma::{Dma, StartTiming, TransferPlan};
use crate::gamecard::{Cpu as GamecardCpu, Gamecard};
use crate::ipc::{Cpu as IpcCpu, SharedIpc};
use crate::rtc::Rtc;
use crate::shared::Shared;
use crate::spi::Spi;
use crate::timer::Timer;

use super::{waitstates, Region, IE_MASK};

pub const BIOS_SIZE: usize = 16 * 1024;
pub const RAM_SIZE: usize = 64 * 1024;
pub const WIFI_SIZE: usize = 64 * 1024;

/// ARM7-side bus: owns this CPU's DMA/timer/RTC/SPI/audio-mixer outright and
/// reaches into the shared main RAM, work RAM, IPC, and gamecard state
/// through reference-counted cells, mirroring `BusA`'s layout.
pub struct BusC {
    pub shared: Rc<RefCell<Shared>>,
    pub ipc: SharedIpc,
    pub gamecard: Rc<RefCell<Gamecard>>,

    pub dma: Dma<false>,
    pub timer: Timer,
    pub rtc: Rtc,
    pub spi: Spi,
    pub apu: Apu,

    pub bios: Vec<u8>,
    /// CPU-C's dedicated fast RAM, distinct from the shared switchable work
    /// RAM (`Shared::wram`).
    pub ram: Vec<u8>,
    /// Wi-Fi register block, modeled as flat addressable RAM returning
    /// synthetic values; a full Wi-Fi protocol state machine is out of scope.
    pub wifi: Vec<u8>,
    pub postflg: u8,

    pub ie: u32,
    pub if_: u32,
    pub ime: bool,

    timer_reload_shadow: [u16; 4],
}

impl BusC {
    pub fn new(shared: Rc<RefCell<Shared>>, ipc: SharedIpc, gamecard: Rc<RefCell<Gamecard>>) -> Self {
        BusC {
            shared,
            ipc,
            gamecard,
            dma: Dma::new(),
            timer: Timer::new(false),
            rtc: Rtc::new(),
            spi: Spi::new(),
            apu: Apu::new(),
            bios: vec![0u8; BIOS_SIZE],
            ram: vec![0u8; RAM_SIZE],
            wifi: vec![0u8; WIFI_SIZE],
            postflg: 0,
            ie: 0,
            if_: 0,
            ime: false,
            timer_reload_shadow: [0; 4],
        }
    }

    pub fn reset(&mut self) {
        self.dma.reset();
        self.timer.reset();
        self.rtc.reset();
        self.spi.reset();
        self.apu.reset();
        self.ram.iter_mut().for_each(|b| *b = 0);
        self.postflg = 0;
        self.ie = 0;
        self.if_ = 0;
        self.ime = false;
        self.timer_reload_shadow = [0; 4];
    }

    pub fn request_irq(&mut self, bit: u32) {
        self.if_ |= 1 << bit;
    }

    fn region_for(address: u32) -> Region {
        match address {
            0x0200_0000..=0x02FF_FFFF => Region::MainRam,
            0x0300_0000..=0x03FF_FFFF => Region::Wram,
            0x0400_0000..=0x04FF_FFFF => Region::Io,
            0x0800_0000..=0x09FF_FFFF => Region::GbaSlot,
            0x0000_0000..=0x0000_3FFF => Region::Bios,
            _ => Region::Unmapped,
        }
    }

    /// Byte-granular access for the owning `Machine` impl (ROM entry-point
    /// copy at reset; everything else goes through the `Bus` trait).
    pub fn read_byte(&mut self, address: u32) -> u8 {
        match address {
            0x0000_0000..=0x0000_3FFF => self.bios[(address & 0x3FFF) as usize],
            0x0200_0000..=0x02FF_FFFF => self.shared.borrow().psram[(address & 0x003F_FFFF) as usize],
            // CPU-C's own fast RAM is mirrored across 0x0380_0000..0x03FF_FFFF;
            // the shared switchable work RAM sits below it.
            0x0380_0000..=0x03FF_FFFF => self.ram[(address as usize) % self.ram.len()],
            0x0300_0000..=0x037F_FFFF => {
                let shared = self.shared.borrow();
                if shared.wram.is_empty() {
                    0
                } else {
                    shared.wram[(address as usize) % shared.wram.len()]
                }
            }
            0x0400_0000..=0x04FF_FFFF => self.io_read_byte(address),
            0x0480_0000..=0x048F_FFFF => self.wifi[(address as usize) % self.wifi.len()],
            0x0800_0000..=0x09FF_FFFF => {
                // Open bus: returns the low 16 bits of the half-word address.
                let half = (address >> 1) & 0xFFFF;
                if address & 1 == 0 { (half & 0xFF) as u8 } else { ((half >> 8) & 0xFF) as u8 }
            }
            _ => 0,
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        match address {
            0x0200_0000..=0x02FF_FFFF => {
                let idx = (address & 0x003F_FFFF) as usize;
                self.shared.borrow_mut().psram[idx] = value;
            }
            0x0380_0000..=0x03FF_FFFF => {
                let len = self.ram.len();
                self.ram[(address as usize) % len] = value;
            }
            0x0300_0000..=0x037F_FFFF => {
                let mut shared = self.shared.borrow_mut();
                if !shared.wram.is_empty() {
                    let len = shared.wram.len();
                    shared.wram[(address as usize) % len] = value;
                }
            }
            0x0400_0000..=0x04FF_FFFF => self.io_write_byte(address, value),
            0x0480_0000..=0x048F_FFFF => {
                let len = self.wifi.len();
                self.wifi[(address as usize) % len] = value;
            }
            _ => {}
        }
    }

    fn io_read_byte(&mut self, address: u32) -> u8 {
        let a = address & 0x0FFF_FFFF;
        match a {
            0x0400_00B0..=0x0400_00DF => self.read_dma_byte(a),
            0x0400_0100..=0x0400_010F => self.read_timer_byte(a),
            0x0400_0130 | 0x0400_0131 | 0x0400_0136 | 0x0400_0137 | 0x0400_0204 | 0x0400_0205 => {
                self.shared.borrow().read_io(a)
            }
            0x0400_0132 | 0x0400_0133 => {
                let shared = self.shared.borrow();
                (shared.keycnt7 >> ((a & 1) * 8)) as u8
            }
            0x0400_0138 => self.rtc.read_io7(),
            0x0400_0180 | 0x0400_0181 => (self.ipc.borrow().read_sync(IpcCpu::C) >> ((a & 1) * 8)) as u8,
            0x0400_0184 | 0x0400_0185 => (self.ipc.borrow().read_cnt(IpcCpu::C) >> ((a & 1) * 8)) as u8,
            0x0400_01A0..=0x0400_01BB => {
                let final_byte = (a & 3) == 3 && (0x0410_0010..=0x0410_0013).contains(&a);
                let mut shared = self.shared.borrow_mut();
                self.gamecard.borrow_mut().read_io(a, final_byte, &mut shared.scheduler)
            }
            0x0400_01C0..=0x0400_01C3 => self.spi.read_io7(a),
            0x0400_0208 => self.ime as u8,
            0x0400_0210..=0x0400_0213 => (self.ie >> ((a & 3) * 8)) as u8,
            0x0400_0214..=0x0400_0217 => (self.if_ >> ((a & 3) * 8)) as u8,
            0x0400_0300 => self.postflg,
            0x0400_0400..=0x0400_0505 => self.apu.read_io(a),
            0x0410_0000..=0x0410_0003 => {
                let mut shared = self.shared.borrow_mut();
                let v = self.ipc.borrow_mut().read_recv_fifo(IpcCpu::C, &mut shared.scheduler);
                (v >> ((a & 3) * 8)) as u8
            }
            _ => {
                log::warn!("bus_c: unknown I/O read at {a:#010X}");
                0
            }
        }
    }

    fn io_write_byte(&mut self, address: u32, value: u8) {
        let a = address & 0x0FFF_FFFF;
        match a {
            0x0400_00B0..=0x0400_00DF => self.write_dma_byte(a, value),
            0x0400_0100..=0x0400_010F => self.write_timer_byte(a, value),
            0x0400_0132 | 0x0400_0133 => {
                let mut shared = self.shared.borrow_mut();
                let shift = (a & 1) * 8;
                shared.keycnt7 = (shared.keycnt7 & !(0xFF << shift)) | ((value as u16) << shift);
            }
            0x0400_0204 | 0x0400_0205 => self.shared.borrow_mut().write_io(a, value),
            0x0400_0138 => {
                let mut shared = self.shared.borrow_mut();
                self.rtc.write_io7(value, &mut shared.scheduler);
            }
            0x0400_0180..=0x0400_0183 => {
                let mut shared = self.shared.borrow_mut();
                self.ipc.borrow_mut().write_sync(IpcCpu::C, (a & 3) as u8, value, &mut shared.scheduler);
            }
            0x0400_0184 | 0x0400_0185 => self.ipc.borrow_mut().write_cnt(IpcCpu::C, (a & 1) as u8, value),
            0x0400_0188..=0x0400_018B => {
                let final_byte = (a & 3) == 3;
                let mut shared = self.shared.borrow_mut();
                self.ipc.borrow_mut().write_send_fifo_byte(IpcCpu::C, (a & 3) as u8, value, final_byte, &mut shared.scheduler);
            }
            0x0400_01A0..=0x0400_01BB => {
                let mut shared = self.shared.borrow_mut();
                self.gamecard.borrow_mut().write_io(GamecardCpu::C, a, value, &mut shared.scheduler);
            }
            0x0400_01C0..=0x0400_01C3 => {
                let mut shared = self.shared.borrow_mut();
                self.spi.write_io7(a, value, &mut shared.scheduler);
            }
            0x0400_0208 => self.ime = value & 1 != 0,
            0x0400_0210..=0x0400_0213 => {
                let shift = (a & 3) * 8;
                self.ie = ((self.ie & !(0xFF << shift)) | ((value as u32) << shift)) & IE_MASK;
            }
            0x0400_0214..=0x0400_0217 => {
                let shift = (a & 3) * 8;
                self.if_ &= !(((value as u32) << shift) & (0xFF << shift));
            }
            0x0400_0300 => self.postflg = value & 1,
            0x0400_0400..=0x0400_0505 => self.apu.write_io(a, value),
            _ => log::warn!("bus_c: unknown I/O write at {a:#010X} = {value:#04X}"),
        }
    }

    fn read_dma_byte(&self, a: u32) -> u8 {
        let index = ((a - 0x0400_00B0) / 0xC) as usize;
        if index >= 4 {
            return 0;
        }
        let off = (a - 0x0400_00B0) % 0xC;
        let ch = self.dma.channel[index];
        match off {
            0..=3 => (ch.src_addr >> (off * 8)) as u8,
            4..=7 => (ch.dst_addr >> ((off - 4) * 8)) as u8,
            8 | 9 => (ch.length >> ((off - 8) * 8)) as u8,
            10 | 11 => (ch.control >> ((off - 10) * 8)) as u8,
            _ => 0,
        }
    }

    fn write_dma_byte(&mut self, a: u32, value: u8) {
        let index = ((a - 0x0400_00B0) / 0xC) as usize;
        if index >= 4 {
            return;
        }
        let off = (a - 0x0400_00B0) % 0xC;
        let ch = &mut self.dma.channel[index];
        match off {
            0..=3 => {
                let shift = off * 8;
                ch.src_addr = (ch.src_addr & !(0xFF << shift)) | ((value as u32) << shift);
            }
            4..=7 => {
                let shift = (off - 4) * 8;
                ch.dst_addr = (ch.dst_addr & !(0xFF << shift)) | ((value as u32) << shift);
            }
            8 | 9 => {
                let shift = (off - 8) * 8;
                ch.length = (ch.length & !(0xFF << shift)) | ((value as u32) << shift);
            }
            10 | 11 => {
                let shift = (off - 10) * 8;
                let merged = (ch.control & !(0xFF << shift)) | ((value as u32) << shift);
                if self.dma.write_control(index, merged) {
                    self.trigger_dma_channel(index, StartTiming::Immediate);
                }
            }
            _ => {}
        }
    }

    fn read_timer_byte(&mut self, a: u32) -> u8 {
        let index = ((a - 0x0400_0100) / 4) as usize;
        if index >= 4 {
            return 0;
        }
        let off = (a - 0x0400_0100) % 4;
        match off {
            0 | 1 => {
                let now = self.shared.borrow().scheduler.current_time;
                (self.timer.read_counter(index, now) >> (off * 8)) as u8
            }
            2 | 3 => (self.timer.read_control(index) >> ((off - 2) * 8)) as u8,
            _ => 0,
        }
    }

    fn write_timer_byte(&mut self, a: u32, value: u8) {
        let index = ((a - 0x0400_0100) / 4) as usize;
        if index >= 4 {
            return;
        }
        let off = (a - 0x0400_0100) % 4;
        match off {
            0 | 1 => {
                let shift = off * 8;
                let current = self.timer_reload_shadow[index];
                let merged = (current & !(0xFF << shift)) | ((value as u16) << shift);
                self.timer_reload_shadow[index] = merged;
                self.timer.write_reload(index, merged);
            }
            2 | 3 => {
                let shift = (off - 2) * 8;
                let current = self.timer.read_control(index);
                let merged = (current & !(0xFF << shift)) | ((value as u16) << shift);
                let now = self.shared.borrow().scheduler.current_time;
                let mut shared = self.shared.borrow_mut();
                self.timer.write_control(index, merged, now, &mut shared.scheduler);
            }
            _ => {}
        }
    }

    /// Mirrors `BusA::dma_start_timing`: drives every channel whose start
    /// timing matches `event`.
    pub fn dma_start_timing(&mut self, event: StartTiming) {
        for i in 0..4 {
            self.trigger_dma_channel(i, event);
        }
    }

    /// Fires a single channel if its configured start timing matches
    /// `event`. Used both by `dma_start_timing`'s per-event sweep and by the
    /// control-register write handler, which must fire an `Immediate`-timed
    /// channel the instant its enable bit rises rather than waiting for the
    /// next matching scheduler event.
    fn trigger_dma_channel(&mut self, index: usize, event: StartTiming) {
        if let Some(plan) = self.dma.check_trigger(index, event) {
            self.run_dma_plan(&plan);
            if self.dma.channel[index].irq_enable() {
                self.request_irq(8 + index as u32);
            }
        }
    }

    fn run_dma_plan(&mut self, plan: &TransferPlan) {
        let mut src = plan.src;
        let mut dst = plan.dst;
        for _ in 0..plan.count {
            if plan.word_size == 4 {
                let mut word = 0u32;
                for b in 0..4u32 {
                    word |= (self.read_byte(src.wrapping_add(b)) as u32) << (b * 8);
                }
                for b in 0..4u32 {
                    self.write_byte(dst.wrapping_add(b), (word >> (b * 8)) as u8);
                }
            } else {
                let mut half = 0u16;
                for b in 0..2u32 {
                    half |= (self.read_byte(src.wrapping_add(b)) as u16) << (b * 8);
                }
                for b in 0..2u32 {
                    self.write_byte(dst.wrapping_add(b), (half >> (b * 8)) as u8);
                }
            }
            src = src.wrapping_add(plan.src_step as u32);
            dst = dst.wrapping_add(plan.dst_step as u32);
        }
    }

    /// Drives one 32 kHz mixing step, resolving each started PCM/ADPCM
    /// channel's source word through this bus's own address space and
    /// wrapping at the channel's loop point. Called by the owning `Machine`
    /// impl on `EventKind::ApuSample`.
    pub fn mix_apu_sample(&mut self) {
        let shared = self.shared.clone();
        let bios: &[u8] = &self.bios;
        let ram: &[u8] = &self.ram;
        let wifi: &[u8] = &self.wifi;
        let channels = self.apu.channel;
        self.apu.do_sample(|index, words_read| {
            let ch = &channels[index];
            let total = ch.loop_total_words().max(1);
            let word_index = if ch.loops() { words_read % total } else { words_read.min(total.saturating_sub(1)) };
            let addr = ch.source_address.wrapping_add(word_index.wrapping_mul(4));
            read_word(addr, bios, ram, &shared, wifi)
        });
    }
}

/// Resolves a 4-byte source word for the audio mixer, independent of `&self`
/// so it can be captured by `mix_apu_sample`'s closure while `self.apu` is
/// mutably borrowed.
fn read_word(addr: u32, bios: &[u8], ram: &[u8], shared: &Rc<RefCell<Shared>>, wifi: &[u8]) -> u32 {
    let read = |address: u32| -> u8 {
        match address {
            0x0000_0000..=0x0000_3FFF => bios[(address & 0x3FFF) as usize],
            0x0200_0000..=0x02FF_FFFF => shared.borrow().psram[(address & 0x003F_FFFF) as usize],
            0x0380_0000..=0x03FF_FFFF => ram[(address as usize) % ram.len()],
            0x0300_0000..=0x037F_FFFF => {
                let s = shared.borrow();
                if s.wram.is_empty() { 0 } else { s.wram[(address as usize) % s.wram.len()] }
            }
            0x0480_0000..=0x048F_FFFF => wifi[(address as usize) % wifi.len()],
            _ => 0,
        }
    };
    let mut word = 0u32;
    for b in 0..4u32 {
        word |= (read(addr.wrapping_add(b)) as u32) << (b * 8);
    }
    word
}

impl Bus for BusC {
    type Address = u32;
    type Data = u32;

    fn read(&mut self, _master: BusMaster, addr: u32) -> u32 {
        let mut word = 0u32;
        for b in 0..4u32 {
            word |= (self.read_byte(addr.wrapping_add(b)) as u32) << (b * 8);
        }
        word
    }

    fn write(&mut self, _master: BusMaster, addr: u32, data: u32) {
        for b in 0..4u32 {
            self.write_byte(addr.wrapping_add(b), (data >> (b * 8)) as u8);
        }
    }

    fn is_halted_for(&self, _master: BusMaster) -> bool {
        false
    }

    fn check_interrupts(&self, _target: BusMaster) -> InterruptState {
        InterruptState { irq: self.ime && (self.ie & self.if_) != 0, nmi: false, firq: false }
    }
}

impl BusC {
    pub fn access_cycles(address: u32, width: u8, sequential: bool) -> u64 {
        waitstates(Self::region_for(address), width, sequential)
    }
}
