//! Top-level machine: owns both CPU buses and drives the scheduler loop that
//! ties every peripheral module together. Advances by jumping straight to
//! the next scheduled event rather than stepping a per-cycle clock (see
//! `scheduler.rs`).

use std::cell::RefCell;
use std::rc::Rc;

use nds_core::core::bus::{Bus, InterruptState};
use nds_core::core::component::BusMasterComponent;
use nds_core::core::machine::{InputButton, Machine};
use nds_core::core::BusMaster;
use nds_core::cpu::arm::ArmCore;

use crate::apu;
use crate::bus::{BusA, BusC};
use crate::dma::StartTiming;
use crate::gamecard::Gamecard;
use crate::ipc::{Ipc, SharedIpc};
use crate::ppu::{self, Ppu};
use crate::scheduler::EventKind;
use crate::shared::Shared;

/// DISPSTAT bit positions shared by both CPUs' IRQ-enable fields.
const DISPSTAT_VBLANK_IRQ_ENABLE: u16 = 1 << 3;
const DISPSTAT_HBLANK_IRQ_ENABLE: u16 = 1 << 4;
const DISPSTAT_VCOUNTER_IRQ_ENABLE: u16 = 1 << 5;

/// Interrupt bit numbers used by this console's IE/IF registers. These
/// diverge from the commonly published GBA-style layout past bit 7:
/// IPC/gamecard/SPI sit at 16-23 here, not 14-21.
mod irq {
    pub const VBLANK: u32 = 0;
    pub const HBLANK: u32 = 1;
    pub const VCOUNT: u32 = 2;
    pub const SERIAL: u32 = 7;
    pub const IPC_SYNC: u32 = 16;
    pub const IPC_SEND_FIFO: u32 = 17;
    pub const IPC_RECV_FIFO: u32 = 18;
    pub const NDS_SLOT_DATA: u32 = 19;
    pub const SPI: u32 = 23;
}

const INPUT_MAP: &[InputButton] = &[
    InputButton { id: 0, name: "A" },
    InputButton { id: 1, name: "B" },
    InputButton { id: 2, name: "Select" },
    InputButton { id: 3, name: "Start" },
    InputButton { id: 4, name: "Right" },
    InputButton { id: 5, name: "Left" },
    InputButton { id: 6, name: "Up" },
    InputButton { id: 7, name: "Down" },
    InputButton { id: 8, name: "R" },
    InputButton { id: 9, name: "L" },
    InputButton { id: 10, name: "X" },
    InputButton { id: 11, name: "Y" },
];

/// Header fields read out of the gamecard image before `Gamecard::load_rom`
/// takes ownership of the bytes. Offsets grounded on `nds.hpp`'s `romInfo`.
#[derive(Default, Clone, Copy)]
struct RomHeader {
    arm9_rom_offset: u32,
    arm9_entry_point: u32,
    arm9_copy_destination: u32,
    arm9_copy_size: u32,
    arm7_rom_offset: u32,
    arm7_entry_point: u32,
    arm7_copy_destination: u32,
    arm7_copy_size: u32,
}

impl RomHeader {
    fn parse(data: &[u8]) -> Self {
        let word = |off: usize| -> u32 {
            if off + 4 > data.len() {
                return 0;
            }
            u32::from_le_bytes(data[off..off + 4].try_into().unwrap())
        };
        RomHeader {
            arm9_rom_offset: word(0x020),
            arm9_entry_point: word(0x024),
            arm9_copy_destination: word(0x028),
            arm9_copy_size: word(0x02C),
            arm7_rom_offset: word(0x030),
            arm7_entry_point: word(0x034),
            arm7_copy_destination: word(0x038),
            arm7_copy_size: word(0x03C),
        }
    }
}

/// Dual-CPU handheld console: CPU-A (application processor) and CPU-C
/// (co-processor) each get their own bus and ARM core, sharing main RAM, the
/// PPU, IPC block, and gamecard state through `Rc<RefCell<_>>` central state
/// objects rather than duplicating them per bus.
pub struct NdsSystem {
    shared: Rc<RefCell<Shared>>,
    ipc: SharedIpc,
    ppu: Rc<RefCell<Ppu>>,
    gamecard: Rc<RefCell<Gamecard>>,

    bus_a: BusA,
    bus_c: BusC,
    cpu_a: ArmCore,
    cpu_c: ArmCore,

    header: RomHeader,
    rom_loaded: bool,
    /// ARM9/ARM7 entry-point regions, sliced out of the *pristine* image
    /// before `Gamecard::load_rom` pre-encrypts its secure area in place.
    /// Boot code is copied from the raw ROM image directly rather than
    /// through the KEY1 command engine, so this copy must predate that
    /// encryption pass.
    arm9_entry_bytes: Vec<u8>,
    arm7_entry_bytes: Vec<u8>,

    /// Stereo samples accumulated since the last `audio_samples()` call,
    /// drained from the APU's double-buffer on every swap (see `apu.rs`).
    audio_accum: Vec<i16>,
    last_apu_sample_index: usize,
}

impl NdsSystem {
    pub fn new() -> Self {
        let shared = Rc::new(RefCell::new(Shared::new()));
        let ipc: SharedIpc = Rc::new(RefCell::new(Ipc::new()));
        let ppu = Rc::new(RefCell::new(Ppu::new()));
        let gamecard = Rc::new(RefCell::new(Gamecard::new()));

        let bus_a = BusA::new(shared.clone(), ipc.clone(), ppu.clone(), gamecard.clone());
        let bus_c = BusC::new(shared.clone(), ipc.clone(), gamecard.clone());

        NdsSystem {
            shared,
            ipc,
            ppu,
            gamecard,
            bus_a,
            bus_c,
            cpu_a: ArmCore::new(BusMaster::Cpu(0)),
            cpu_c: ArmCore::new(BusMaster::Cpu(1)),
            header: RomHeader::default(),
            rom_loaded: false,
            arm9_entry_bytes: Vec::new(),
            arm7_entry_bytes: Vec::new(),
            audio_accum: Vec::new(),
            last_apu_sample_index: 0,
        }
    }

    /// Parses the header fields `reset()` needs before handing the image to
    /// `Gamecard::load_rom` (which owns the bytes from here on and has no
    /// accessor back to them).
    pub fn load_rom(&mut self, data: Vec<u8>) {
        self.header = RomHeader::parse(&data);
        let slice = |offset: u32, len: u32| -> Vec<u8> {
            let start = offset as usize;
            let end = (start + len as usize).min(data.len());
            if start >= data.len() {
                Vec::new()
            } else {
                data[start..end].to_vec()
            }
        };
        self.arm9_entry_bytes = slice(self.header.arm9_rom_offset, self.header.arm9_copy_size);
        self.arm7_entry_bytes = slice(self.header.arm7_rom_offset, self.header.arm7_copy_size);
        self.gamecard.borrow_mut().load_rom(data);
        self.rom_loaded = true;
    }

    pub fn load_bios_a(&mut self, data: &[u8]) {
        let len = data.len().min(self.bus_a.bios.len());
        self.bus_a.bios[..len].copy_from_slice(&data[..len]);
    }

    pub fn load_bios_c(&mut self, data: &[u8]) {
        let len = data.len().min(self.bus_c.bios.len());
        self.bus_c.bios[..len].copy_from_slice(&data[..len]);
    }

    pub fn load_firmware(&mut self, data: &[u8]) {
        self.bus_c.spi.load_firmware(data);
    }

    fn run_dispatch(&mut self, event: EventKind) {
        match event {
            EventKind::Stop => {
                self.shared.borrow_mut().scheduler.running = false;
            }
            EventKind::IpcSyncA => self.bus_a.request_irq(irq::IPC_SYNC),
            EventKind::IpcSyncC => self.bus_c.request_irq(irq::IPC_SYNC),
            EventKind::IpcSendFifoA => self.bus_a.request_irq(irq::IPC_SEND_FIFO),
            EventKind::IpcSendFifoC => self.bus_c.request_irq(irq::IPC_SEND_FIFO),
            EventKind::IpcRecvFifoA => self.bus_a.request_irq(irq::IPC_RECV_FIFO),
            EventKind::IpcRecvFifoC => self.bus_c.request_irq(irq::IPC_RECV_FIFO),

            EventKind::PpuLineStart => {
                let mut ppu = self.ppu.borrow_mut();
                let mut shared = self.shared.borrow_mut();
                ppu.clear_hblank();
                ppu.on_line_start(&mut shared.scheduler);
                let vcount = ppu.vcount;
                let dispstat9 = ppu.dispstat9;
                let dispstat7 = ppu.dispstat7;
                drop(ppu);
                drop(shared);

                if vcount == ppu::VBLANK_START_LINE as u16 {
                    if dispstat9 & DISPSTAT_VBLANK_IRQ_ENABLE != 0 {
                        self.bus_a.request_irq(irq::VBLANK);
                    }
                    if dispstat7 & DISPSTAT_VBLANK_IRQ_ENABLE != 0 {
                        self.bus_c.request_irq(irq::VBLANK);
                    }
                    self.bus_a.dma_start_timing(StartTiming::VBlank);
                    self.bus_c.dma_start_timing(StartTiming::VBlank);
                }
                // set_vcounter_flag already re-evaluates the match every
                // line; since vcount strictly advances mod 263, this fires
                // at most once per frame per CPU.
                if dispstat9 & 0x4 != 0 && dispstat9 & DISPSTAT_VCOUNTER_IRQ_ENABLE != 0 {
                    self.bus_a.request_irq(irq::VCOUNT);
                }
                if dispstat7 & 0x4 != 0 && dispstat7 & DISPSTAT_VCOUNTER_IRQ_ENABLE != 0 {
                    self.bus_c.request_irq(irq::VCOUNT);
                }
            }
            EventKind::PpuHBlank => {
                let mut ppu = self.ppu.borrow_mut();
                ppu.on_hblank();
                let vcount = ppu.vcount;
                let dispstat9 = ppu.dispstat9;
                let dispstat7 = ppu.dispstat7;
                drop(ppu);

                if dispstat9 & DISPSTAT_HBLANK_IRQ_ENABLE != 0 {
                    self.bus_a.request_irq(irq::HBLANK);
                }
                if dispstat7 & DISPSTAT_HBLANK_IRQ_ENABLE != 0 {
                    self.bus_c.request_irq(irq::HBLANK);
                }
                if vcount < ppu::VBLANK_START_LINE as u16 {
                    self.bus_a.dma_start_timing(StartTiming::HBlank);
                }
            }
            EventKind::RefreshWramPages => {
                // Both CPUs read the same `Shared::wram` buffer directly
                // (see `bus/a.rs`/`bus/c.rs`); WRAMCNT's CPU-A/CPU-C split is
                // not modeled as a separate page table, so there is nothing
                // to refresh here. Kept for symmetry with the `RefreshVramPages`
                // event a WRAMCNT write always enqueues alongside it.
            }
            EventKind::RefreshVramPages => {
                self.ppu.borrow_mut().vram.refresh();
            }
            EventKind::SpiFinished => self.bus_c.request_irq(irq::SPI),
            EventKind::RtcRefresh => {
                let now = self.shared.borrow().scheduler.current_time;
                let mut shared = self.shared.borrow_mut();
                self.bus_c.rtc.refresh(true, now, &mut shared.scheduler);
            }
            EventKind::SerialInterrupt => self.bus_c.request_irq(irq::SERIAL),
            EventKind::TimerOverflowA(i) => {
                let mut shared = self.shared.borrow_mut();
                if self.bus_a.timer.on_overflow_event(i as usize, &mut shared.scheduler) {
                    drop(shared);
                    self.bus_a.request_irq(3 + i as u32);
                }
            }
            EventKind::TimerOverflowC(i) => {
                let mut shared = self.shared.borrow_mut();
                if self.bus_c.timer.on_overflow_event(i as usize, &mut shared.scheduler) {
                    drop(shared);
                    self.bus_c.request_irq(3 + i as u32);
                }
            }
            EventKind::GamecardTransferReady => {
                let mut shared = self.shared.borrow_mut();
                self.gamecard.borrow_mut().on_transfer_ready(&mut shared.scheduler);
            }
            EventKind::GamecardCommandComplete => {
                // EXMEMCNT bit 11: NDS-slot bus owner (0 = CPU-A, 1 = CPU-C).
                let owned_by_c = self.shared.borrow().exmemcnt & (1 << 11) != 0;
                if owned_by_c {
                    self.bus_c.request_irq(irq::NDS_SLOT_DATA);
                } else {
                    self.bus_a.request_irq(irq::NDS_SLOT_DATA);
                }
            }
            EventKind::ApuSample => {
                self.bus_c.mix_apu_sample();
                let index = self.bus_c.apu.sample_index();
                if index < self.last_apu_sample_index {
                    self.audio_accum.extend_from_slice(&self.bus_c.apu.output_samples);
                }
                self.last_apu_sample_index = index;
                self.shared.borrow_mut().scheduler.schedule(apu::SAMPLE_PERIOD_TICKS, EventKind::ApuSample);
            }
        }
    }
}

impl Default for NdsSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine for NdsSystem {
    fn display_size(&self) -> (u32, u32) {
        (ppu::SCREEN_WIDTH as u32, ppu::SCREEN_HEIGHT as u32 * 2)
    }

    fn run_frame(&mut self) {
        if !self.rom_loaded {
            return;
        }
        self.audio_accum.clear();
        let frame_cycles = ppu::CYCLES_PER_LINE * ppu::LINES_PER_FRAME;
        let start = self.shared.borrow().scheduler.current_time;
        let target = start + frame_cycles;
        loop {
            if !self.shared.borrow().scheduler.running {
                break;
            }
            let next = self.shared.borrow().scheduler.peek_timestamp();
            let now = match next {
                Some(t) if t < target => t,
                _ => target,
            };
            self.shared.borrow_mut().scheduler.current_time = now;
            loop {
                let ready = self.shared.borrow_mut().scheduler.pop_ready();
                match ready {
                    Some(event) => self.run_dispatch(event),
                    None => break,
                }
            }

            // The stub cores don't decode instructions, but still observe
            // the current interrupt line so a real interpreter dropped in
            // behind the same seam picks up IRQs immediately.
            let int_a = self.bus_a.check_interrupts(BusMaster::Cpu(0));
            self.cpu_a.signal_interrupt(int_a);
            self.cpu_a.tick_with_bus(&mut self.bus_a as &mut dyn Bus<Address = u32, Data = u32>, BusMaster::Cpu(0));
            let int_c = self.bus_c.check_interrupts(BusMaster::Cpu(1));
            self.cpu_c.signal_interrupt(int_c);
            self.cpu_c.tick_with_bus(&mut self.bus_c as &mut dyn Bus<Address = u32, Data = u32>, BusMaster::Cpu(1));

            if now >= target {
                break;
            }
        }
    }

    fn render_frame(&self, buffer: &mut [u8]) {
        let (top, bottom) = self.ppu.borrow().snapshot();
        let w = ppu::SCREEN_WIDTH;
        let h = ppu::SCREEN_HEIGHT;

        let blit = |src: &[u16], dest_row_offset: usize, buffer: &mut [u8]| {
            for y in 0..h {
                for x in 0..w {
                    let px = src[y * w + x];
                    let r = (px & 0x1F) as u8;
                    let g = ((px >> 5) & 0x1F) as u8;
                    let b = ((px >> 10) & 0x1F) as u8;
                    let offset = ((dest_row_offset + y) * w + x) * 3;
                    buffer[offset] = (r << 3) | (r >> 2);
                    buffer[offset + 1] = (g << 3) | (g >> 2);
                    buffer[offset + 2] = (b << 3) | (b >> 2);
                }
            }
        };
        blit(&top, 0, buffer);
        blit(&bottom, h, buffer);
    }

    fn set_input(&mut self, button: u8, pressed: bool) {
        let mut shared = self.shared.borrow_mut();
        match button {
            0 => shared.set_key(Some(0), None, pressed), // A
            1 => shared.set_key(Some(1), None, pressed), // B
            2 => shared.set_key(Some(2), None, pressed), // Select
            3 => shared.set_key(Some(3), None, pressed), // Start
            4 => shared.set_key(Some(4), None, pressed), // Right
            5 => shared.set_key(Some(5), None, pressed), // Left
            6 => shared.set_key(Some(6), None, pressed), // Up
            7 => shared.set_key(Some(7), None, pressed), // Down
            8 => shared.set_key(Some(8), None, pressed), // R
            9 => shared.set_key(Some(9), None, pressed), // L
            10 => shared.set_key(None, Some(0), pressed), // X
            11 => shared.set_key(None, Some(1), pressed), // Y
            _ => {}
        }
    }

    fn input_map(&self) -> &[InputButton] {
        INPUT_MAP
    }

    fn reset(&mut self) {
        self.shared.borrow_mut().scheduler.running = false;

        self.shared.borrow_mut().reset();
        self.ipc.borrow_mut().reset();
        self.ppu.borrow_mut().reset();
        self.gamecard.borrow_mut().reset();
        self.bus_a.reset();
        self.bus_c.reset();
        self.cpu_a = ArmCore::new(BusMaster::Cpu(0));
        self.cpu_c = ArmCore::new(BusMaster::Cpu(1));
        self.audio_accum.clear();
        self.last_apu_sample_index = 0;

        {
            let ppu = self.ppu.borrow();
            let mut shared = self.shared.borrow_mut();
            ppu.schedule_initial_events(&mut shared.scheduler);
            shared.scheduler.schedule(0, EventKind::RtcRefresh);
            shared.scheduler.schedule(apu::SAMPLE_PERIOD_TICKS, EventKind::ApuSample);
            shared.scheduler.running = true;
        }

        if !self.rom_loaded {
            return;
        }

        let header = self.header;
        for i in 0..header.arm9_copy_size {
            let byte = self.gamecard.borrow().rom_byte(header.arm9_rom_offset + i);
            self.bus_a.write_byte(header.arm9_copy_destination + i, byte);
        }
        for i in 0..header.arm7_copy_size {
            let byte = self.gamecard.borrow().rom_byte(header.arm7_rom_offset + i);
            self.bus_c.write_byte(header.arm7_copy_destination + i, byte);
        }

        self.cpu_a.set_pc(header.arm9_entry_point);
        self.cpu_a.state.r[12] = header.arm9_entry_point;
        self.cpu_a.state.r[14] = header.arm9_entry_point;
        self.cpu_a.state.r[13] = 0x0300_2F7C;
        self.cpu_c.set_pc(header.arm7_entry_point);
        self.cpu_c.state.r[12] = header.arm7_entry_point;
        self.cpu_c.state.r[14] = header.arm7_entry_point;
        self.cpu_c.state.r[13] = 0x0300_FD80;
        // R13_irq/R13_svc (0x3003F80/0x3003FC0 for CPU-A, 0x300FF80/0x300FFC0
        // for CPU-C) have no distinct storage: `ArmState` models one flat
        // register file rather than ARM's per-mode banked registers, since
        // the instruction core behind this seam is a pluggable stub (see
        // `core::cpu::arm`). A real interpreter restores these on its own
        // mode switches; nothing here depends on their initial values.

        self.bus_a.coproc_write(15, 9, 1, 0, 0x0080_000A);
        self.bus_a.coproc_write(15, 9, 1, 1, 0x0000_000C);
    }

    fn audio_samples(&self) -> &[i16] {
        &self.audio_accum
    }

    fn set_touch(&mut self, pressed: bool, x: u16, y: u16) {
        if pressed {
            self.bus_c.spi.set_touch(x, y);
        }
    }

    fn set_time(&mut self, unix_time: u64) {
        self.bus_c.rtc.set_unix_time(unix_time);
    }
}
