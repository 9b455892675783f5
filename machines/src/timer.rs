//! Four cascadable, prescaled 16-bit timer channels per CPU.

use crate::scheduler::{EventKind, Scheduler};

const PRESCALER_SHIFT: [u32; 4] = [1, 7, 9, 12];

#[derive(Default, Clone, Copy)]
struct Channel {
    reload: u16,
    counter: u16,
    prescaler: u8, // 0..=3 index into PRESCALER_SHIFT
    cascade: bool,
    irq_enable: bool,
    start: bool,
    last_increment_timestamp: u64,
}

pub struct Timer {
    is_a: bool,
    channel: [Channel; 4],
}

impl Timer {
    pub fn new(is_a: bool) -> Self {
        Timer { is_a, channel: [Channel::default(); 4] }
    }

    pub fn reset(&mut self) {
        self.channel = [Channel::default(); 4];
    }

    fn overflow_event(&self, index: usize) -> EventKind {
        if self.is_a {
            EventKind::TimerOverflowA(index as u8)
        } else {
            EventKind::TimerOverflowC(index as u8)
        }
    }

    /// Recompute `counter` from the time elapsed since the last increment,
    /// rounding down to the prescaler's tick boundary. Non-cascading,
    /// running channels only; cascade channels only change on the previous
    /// channel's overflow.
    fn update_counter(&mut self, index: usize, now: u64) {
        let ch = self.channel[index];
        if !ch.start || ch.cascade {
            return;
        }
        let shift = PRESCALER_SHIFT[ch.prescaler as usize];
        let elapsed_ticks = (now - ch.last_increment_timestamp) >> shift;
        if elapsed_ticks == 0 {
            return;
        }
        let (new_counter, overflowed) = Self::advance(ch.counter, ch.reload, elapsed_ticks);
        self.channel[index].counter = new_counter;
        self.channel[index].last_increment_timestamp += elapsed_ticks << shift;
        if overflowed {
            self.cascade_from(index, now);
        }
    }

    fn advance(counter: u16, reload: u16, ticks: u64) -> (u16, bool) {
        let span = (0x10000 - reload as u32).max(1) as u64;
        let total = counter as u64 + ticks;
        if total < span {
            (counter + ticks as u16, false)
        } else {
            let remainder = (total - span) % span;
            (reload.wrapping_add(remainder as u16), true)
        }
    }

    fn cascade_from(&mut self, index: usize, now: u64) {
        if index + 1 >= 4 {
            return;
        }
        let next = index + 1;
        if self.channel[next].start && self.channel[next].cascade {
            let (new_counter, overflowed) =
                Self::advance(self.channel[next].counter, self.channel[next].reload, 1);
            self.channel[next].counter = new_counter;
            if overflowed {
                self.cascade_from(next, now);
            }
        }
    }

    /// Schedule the next overflow event for a running, non-cascading
    /// channel. Called after any register write that changes timing.
    fn schedule_overflow(&self, index: usize, sched: &mut Scheduler) {
        let ch = self.channel[index];
        if !ch.start || ch.cascade {
            return;
        }
        let shift = PRESCALER_SHIFT[ch.prescaler as usize];
        let remaining_counts = 0x10000u32 - ch.counter as u32;
        let delay = (remaining_counts as u64) << shift;
        sched.schedule_absolute(ch.last_increment_timestamp + delay, self.overflow_event(index));
    }

    /// Handler for a `TimerOverflow*` scheduled event: re-validate against
    /// the current counter (the event may be stale if the channel was
    /// reconfigured since it was scheduled) and re-arm the next overflow.
    /// Returns whether this was a genuine overflow with `irq_enable` set;
    /// the caller (bus) is responsible for requesting the actual IRQ.
    pub fn on_overflow_event(&mut self, index: usize, sched: &mut Scheduler) -> bool {
        let now = sched.current_time;
        self.update_counter(index, now);
        let ch = self.channel[index];
        if !ch.start || ch.cascade {
            return false;
        }
        let overflowed = ch.counter == ch.reload && ch.irq_enable;
        self.schedule_overflow(index, sched);
        overflowed
    }

    pub fn read_counter(&mut self, index: usize, now: u64) -> u16 {
        self.update_counter(index, now);
        self.channel[index].counter
    }

    pub fn read_control(&self, index: usize) -> u16 {
        let ch = self.channel[index];
        let mut v = ch.prescaler as u16;
        if ch.cascade {
            v |= 1 << 2;
        }
        if ch.irq_enable {
            v |= 1 << 6;
        }
        if ch.start {
            v |= 1 << 7;
        }
        v
    }

    pub fn write_reload(&mut self, index: usize, value: u16) {
        self.channel[index].reload = value;
    }

    pub fn write_control(&mut self, index: usize, value: u16, now: u64, sched: &mut Scheduler) {
        self.update_counter(index, now);
        let ch = &mut self.channel[index];
        let was_running = ch.start;
        ch.prescaler = (value & 0x3) as u8;
        ch.cascade = value & (1 << 2) != 0;
        ch.irq_enable = value & (1 << 6) != 0;
        ch.start = value & (1 << 7) != 0;

        let rising_edge = !was_running && ch.start;
        if rising_edge {
            ch.counter = ch.reload;
            ch.last_increment_timestamp = now;
        }
        if !ch.cascade {
            self.schedule_overflow(index, sched);
        }
    }

    /// Whether the channel that just overflowed should raise a hardware
    /// interrupt (checked by the bus after `on_overflow_event`).
    pub fn irq_enabled(&self, index: usize) -> bool {
        self.channel[index].irq_enable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_advances_with_prescaler() {
        let mut timer = Timer::new(true);
        let mut sched = Scheduler::new();
        timer.write_reload(0, 0);
        timer.write_control(0, 1 << 7, 0, &mut sched); // prescaler=1 => shift 1
        let counter = timer.read_counter(0, 20);
        assert_eq!(counter, 10);
    }

    #[test]
    fn overflow_reloads_and_reschedules() {
        let mut timer = Timer::new(true);
        let mut sched = Scheduler::new();
        timer.write_reload(0, 0xFFFE);
        timer.write_control(0, (1 << 7) | (1 << 6), 0, &mut sched); // start, irq enable, shift 1
        sched.current_time = 4; // 2 prescaler ticks -> overflow once
        timer.on_overflow_event(0, &mut sched);
        assert_eq!(timer.channel[0].counter, 0xFFFE);
    }
}
