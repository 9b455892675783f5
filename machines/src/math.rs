//! CPU-A division/square-root coprocessor: fixed-latency divider and
//! square-root units exposed as memory-mapped registers.

use crate::scheduler::Scheduler;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum DivMode {
    /// 32/32 signed.
    Mode0,
    /// 64/32 signed.
    Mode1,
    /// 64/64 signed.
    Mode2Or3,
}

pub struct DsMath {
    div_numer: u64,
    div_denom: u64,
    div_result: u64,
    div_rem_result: u64,
    div_mode: u8,
    div_busy_until: u64,

    sqrt_input: u64,
    sqrt_result: u32,
    sqrt_mode64: bool,
    sqrt_busy_until: u64,
}

impl Default for DsMath {
    fn default() -> Self {
        Self::new()
    }
}

impl DsMath {
    pub fn new() -> Self {
        DsMath {
            div_numer: 0,
            div_denom: 0,
            div_result: 0,
            div_rem_result: 0,
            div_mode: 0,
            div_busy_until: 0,
            sqrt_input: 0,
            sqrt_result: 0,
            sqrt_mode64: false,
            sqrt_busy_until: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn div_busy(&self, now: u64) -> bool {
        now < self.div_busy_until
    }
    pub fn sqrt_busy(&self, now: u64) -> bool {
        now < self.sqrt_busy_until
    }

    pub fn write_div_numer(&mut self, value: u64, now: u64, sched: &mut Scheduler) {
        self.div_numer = value;
        self.recompute_div(now, sched);
    }
    pub fn write_div_denom(&mut self, value: u64, now: u64, sched: &mut Scheduler) {
        self.div_denom = value;
        self.recompute_div(now, sched);
    }
    pub fn write_div_cnt(&mut self, mode: u8, now: u64, sched: &mut Scheduler) {
        self.div_mode = mode & 0x3;
        self.recompute_div(now, sched);
    }

    pub fn div_result(&self) -> u64 {
        self.div_result
    }
    pub fn div_rem_result(&self) -> u64 {
        self.div_rem_result
    }

    fn recompute_div(&mut self, now: u64, sched: &mut Scheduler) {
        let (numer, denom): (i64, i64) = match self.div_mode {
            0 => (self.div_numer as i32 as i64, self.div_denom as i32 as i64),
            _ => (self.div_numer as i64, {
                if self.div_mode == 1 {
                    self.div_denom as i32 as i64
                } else {
                    self.div_denom as i64
                }
            }),
        };

        let (quotient, remainder) = if denom == 0 {
            // Zero-denominator corner case: full-width sign-extended -1/+1
            // pattern depending on numerator sign.
            let q: i64 = if numer >= 0 { -1 } else { 1 };
            (q, numer)
        } else if numer == i64::MIN && denom == -1 && self.div_mode != 0 {
            (i64::MIN, 0)
        } else if self.div_mode == 0 && numer == i32::MIN as i64 && denom == -1 {
            (i32::MIN as i64, 0)
        } else {
            (numer / denom, numer % denom)
        };

        self.div_result = quotient as u64;
        self.div_rem_result = remainder as u64;

        let delay = match self.div_mode {
            0 => 18,
            _ => 34,
        };
        self.div_busy_until = now + delay;
        let _ = sched; // completion is polled via div_busy(); no IRQ fires
    }

    pub fn write_sqrt_cnt(&mut self, mode64: bool, now: u64) {
        self.sqrt_mode64 = mode64;
        self.recompute_sqrt(now);
    }

    pub fn write_sqrt_input(&mut self, value: u64, now: u64) {
        self.sqrt_input = value;
        self.recompute_sqrt(now);
    }

    pub fn sqrt_result(&self) -> u32 {
        self.sqrt_result
    }

    fn recompute_sqrt(&mut self, now: u64) {
        self.sqrt_result = if self.sqrt_mode64 {
            Self::isqrt64(self.sqrt_input)
        } else {
            (self.sqrt_input as u32 as f64).sqrt() as u32
        };
        self.sqrt_busy_until = now + 13;
    }

    /// Bounded binary search sqrt for the 64-bit input mode (native f64 sqrt
    /// loses precision at this width).
    fn isqrt64(value: u64) -> u32 {
        let mut lo: u64 = 0;
        let mut hi: u64 = 0xFFFF_FFFF;
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if mid * mid <= value {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_division_satisfies_quotient_remainder_identity() {
        let mut math = DsMath::new();
        let mut sched = Scheduler::new();
        let numer: i64 = -123_456_789;
        let denom: i64 = 12345;
        math.div_mode = 2; // 64/64
        math.write_div_numer(numer as u64, 0, &mut sched);
        math.write_div_denom(denom as u64, 0, &mut sched);
        let q = math.div_result() as i64;
        let r = math.div_rem_result() as i64;
        assert_eq!(q * denom + r, numer);
    }

    #[test]
    fn division_by_min_and_neg_one_scenario() {
        let mut math = DsMath::new();
        let mut sched = Scheduler::new();
        math.div_mode = 0;
        math.write_div_numer(0x8000_0000, 0, &mut sched);
        math.write_div_denom(0xFFFF_FFFF, 0, &mut sched);
        assert_eq!(math.div_result() as u32, 0x8000_0000);
        assert_eq!(math.div_rem_result() as u32, 0);
    }

    #[test]
    fn isqrt64_matches_known_values() {
        assert_eq!(DsMath::isqrt64(0), 0);
        assert_eq!(DsMath::isqrt64(1), 1);
        assert_eq!(DsMath::isqrt64(15), 3);
        assert_eq!(DsMath::isqrt64(16), 4);
        assert_eq!(DsMath::isqrt64(u64::MAX), 0xFFFF_FFFF);
    }
}
