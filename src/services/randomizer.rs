use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Night hours drained toward business-hour peaks in the high-volume regime.
const NIGHT_HOURS: [usize; 8] = [0, 1, 2, 3, 4, 5, 22, 23];
const PEAK_HOURS: [usize; 6] = [9, 10, 11, 14, 15, 16];

/// Stochastic schedule shaping over a seeded PRNG. Pure, no I/O: the same
/// seed reproduces the same plan, which is what the plan round-trip relies on.
pub struct Randomizer {
    rng: StdRng,
}

impl Randomizer {
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    pub fn from_seed(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// Daily quota for `day` on a geometric curve whose first `quota_days`
    /// terms sum to `target_sum`. Beyond the curve the volume keeps growing
    /// at a 3-7% daily rate drawn per call. Jitter is proportional to the
    /// campaign's randomization intensity, so intensity 0 is fully
    /// deterministic.
    pub fn daily_quota(
        &mut self,
        day: i32,
        start: i32,
        quota_days: i32,
        target_sum: i32,
        intensity: f32,
    ) -> i64 {
        let start = start.max(1) as f64;
        let quota_days = quota_days.max(1);
        let ratio = solve_growth_ratio(start, quota_days, target_sum as f64);

        let base = if day <= quota_days {
            start * ratio.powi(day - 1)
        } else {
            let growth: f64 = self.rng.gen_range(1.03..=1.07);
            start * ratio.powi(quota_days - 1) * growth.powi(day - quota_days)
        };

        let mut quota = base;
        if intensity > 0.0 {
            let magnitude: f64 = self.rng.gen_range(0.05..=0.15);
            let sign = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            quota = base * (1.0 + sign * magnitude * intensity as f64);
        }

        (quota.round() as i64).max(1)
    }

    /// Splits `total` into `n` parts, each within ±20% of the average and at
    /// least 1, summing exactly to `total`. The residue lands on the last
    /// part.
    pub fn split(&mut self, total: i64, n: usize) -> Vec<i64> {
        if n == 0 {
            return vec![];
        }
        if total <= n as i64 {
            // Too few to randomize: one each until the total runs out.
            return (0..n).map(|i| if (i as i64) < total { 1 } else { 0 }).collect();
        }

        let avg = total as f64 / n as f64;
        let lo_band = ((avg * 0.8).floor() as i64).max(1);
        let hi_band = ((avg * 1.2).floor() as i64).max(lo_band);
        let mut parts = Vec::with_capacity(n);
        let mut remaining = total;

        for i in 0..n - 1 {
            let slots_left = (n - i - 1) as i64;
            // Keep every later slot, residue included, inside the band.
            let lo = lo_band.max(remaining - slots_left * hi_band).max(1);
            let hi = hi_band.min(remaining - slots_left * lo_band).min(remaining - slots_left).max(1);
            let lo = lo.min(hi);
            let part = self.rng.gen_range(lo..=hi);
            parts.push(part);
            remaining -= part;
        }
        parts.push(remaining);
        parts
    }

    /// Sender shares within one domain: base ± (0.2 + 0.3·intensity)·base,
    /// capped at `max_pct` percent of the domain total, exact sum.
    pub fn split_with_cap(
        &mut self,
        total: i64,
        n: usize,
        max_pct: f32,
        intensity: f32,
    ) -> Vec<i64> {
        if n == 0 {
            return vec![];
        }
        if total <= n as i64 {
            return (0..n).map(|i| if (i as i64) < total { 1 } else { 0 }).collect();
        }

        let cap = (((max_pct as f64 / 100.0) * total as f64).floor() as i64).max(1);
        let base = total as f64 / n as f64;
        let variation = (0.2 + 0.3 * intensity as f64) * base;
        let lo_band = ((base - variation).floor() as i64).max(1);
        let hi_band = ((base + variation).ceil() as i64).min(cap).max(lo_band.min(cap)).max(1);

        let mut parts = Vec::with_capacity(n);
        let mut remaining = total;

        for i in 0..n - 1 {
            let slots_left = (n - i - 1) as i64;
            // The residue slot must also land under the cap, so earlier
            // draws leave it a feasible share.
            let lo = lo_band.max(remaining - slots_left * hi_band).max(1);
            let hi = hi_band.min(remaining - slots_left).max(1);
            let lo = lo.min(hi);
            let part = self.rng.gen_range(lo..=hi);
            parts.push(part);
            remaining -= part;
        }
        parts.push(remaining);
        parts
    }

    /// Spreads a sender's daily total over 24 hours. Three regimes by volume:
    /// large senders fill the whole day with business-hour peaks, mid and low
    /// volumes concentrate on a random subset of hours. Always sums to
    /// exactly `total`.
    pub fn hourly_distribution(&mut self, total: i64, intensity: f32) -> Vec<i64> {
        let mut hours = vec![0i64; 24];
        if total <= 0 {
            return hours;
        }

        let active: Vec<usize>;
        if total > 2000 {
            active = (0..24).collect();
            let base = total / 24;
            for h in hours.iter_mut() {
                *h = base;
            }
            for i in 0..(total % 24) as usize {
                hours[i % 24] += 1;
            }

            // Drain night traffic into the peaks, at most 30% of any night
            // hour's base.
            let mut to_move = (total as f64 * 0.20) as i64;
            for &night in NIGHT_HOURS.iter() {
                if to_move <= 0 {
                    break;
                }
                let movable = ((hours[night] as f64 * 0.30) as i64).min(to_move);
                if movable <= 0 {
                    continue;
                }
                hours[night] -= movable;
                let peak = PEAK_HOURS[self.rng.gen_range(0..PEAK_HOURS.len())];
                hours[peak] += movable;
                to_move -= movable;
            }

            let swaps = (intensity as f64 * 0.10 * total as f64) as i64;
            self.random_swaps(&mut hours, &active, swaps);
        } else if total > 500 {
            let count = self.rng.gen_range(12..=18usize);
            active = self.sample_hours(count);
            self.equal_fill(&mut hours, &active, total);
            let swaps = (intensity as f64 * 0.30 * total as f64) as i64;
            self.random_swaps(&mut hours, &active, swaps);
        } else {
            let lo = (8 - (3.0 * intensity).floor() as i64).max(4);
            let hi = (12 - (2.0 * intensity).floor() as i64).min(12).max(lo);
            let count = self.rng.gen_range(lo..=hi) as usize;
            active = self.sample_hours(count);
            self.equal_fill(&mut hours, &active, total);
            let swaps = (intensity as f64 * 0.30 * total as f64) as i64;
            self.random_swaps(&mut hours, &active, swaps);
        }

        self.correct_total(&mut hours, &active, total);
        hours
    }

    /// Spreads one hour's count over its 60 minutes: floor division, random
    /// remainder, then 10% random swaps.
    pub fn minute_distribution(&mut self, count: i64) -> Vec<i64> {
        let mut minutes = vec![count / 60; 60];
        for _ in 0..(count % 60) {
            let m = self.rng.gen_range(0..60usize);
            minutes[m] += 1;
        }

        let swaps = (count as f64 * 0.10) as i64;
        for _ in 0..swaps {
            let src = self.rng.gen_range(0..60usize);
            let dst = self.rng.gen_range(0..60usize);
            if src != dst && minutes[src] > 0 {
                minutes[src] -= 1;
                minutes[dst] += 1;
            }
        }
        minutes
    }

    fn sample_hours(&mut self, count: usize) -> Vec<usize> {
        let mut all: Vec<usize> = (0..24).collect();
        all.shuffle(&mut self.rng);
        all.truncate(count.min(24));
        all.sort_unstable();
        all
    }

    fn equal_fill(&mut self, hours: &mut [i64], active: &[usize], total: i64) {
        let base = total / active.len() as i64;
        for &h in active {
            hours[h] = base;
        }
        for _ in 0..(total % active.len() as i64) {
            let h = active[self.rng.gen_range(0..active.len())];
            hours[h] += 1;
        }
    }

    /// Moves single emails between active hours. The source must keep at
    /// least one email so an active hour never empties out.
    fn random_swaps(&mut self, hours: &mut [i64], active: &[usize], swaps: i64) {
        if active.len() < 2 {
            return;
        }
        for _ in 0..swaps {
            let src = active[self.rng.gen_range(0..active.len())];
            let dst = active[self.rng.gen_range(0..active.len())];
            if src != dst && hours[src] > 1 {
                hours[src] -= 1;
                hours[dst] += 1;
            }
        }
    }

    fn correct_total(&mut self, hours: &mut [i64], active: &[usize], total: i64) {
        if active.is_empty() {
            return;
        }
        let mut diff = total - hours.iter().sum::<i64>();
        while diff > 0 {
            let h = active[self.rng.gen_range(0..active.len())];
            hours[h] += 1;
            diff -= 1;
        }
        while diff < 0 {
            let h = active[self.rng.gen_range(0..active.len())];
            if hours[h] > 0 {
                hours[h] -= 1;
                diff += 1;
            }
        }
    }
}

impl Default for Randomizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Bisects the growth ratio r in [1, 10] so that
/// start + start·r + … + start·r^(days-1) = target_sum.
fn solve_growth_ratio(start: f64, quota_days: i32, target_sum: f64) -> f64 {
    let mut lo = 1.0f64;
    let mut hi = 10.0f64;
    for _ in 0..100 {
        let mid = (lo + hi) / 2.0;
        let sum = geometric_sum(start, mid, quota_days);
        if (sum - target_sum).abs() <= 1.0 {
            return mid;
        }
        if sum < target_sum {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) / 2.0
}

fn geometric_sum(start: f64, ratio: f64, days: i32) -> f64 {
    if (ratio - 1.0).abs() < 1e-9 {
        start * days as f64
    } else {
        start * (ratio.powi(days) - 1.0) / (ratio - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_curve_hits_target_sum() {
        let mut r = Randomizer::from_seed(7);
        let total: i64 = (1..=30).map(|d| r.daily_quota(d, 1000, 30, 450_000, 0.0)).sum();
        let error = (total - 450_000).abs() as f64 / 450_000.0;
        assert!(error < 0.01, "sum {} deviates more than 1%", total);
    }

    #[test]
    fn test_quota_curve_starts_at_base_and_grows() {
        let mut r = Randomizer::from_seed(7);
        let quotas: Vec<i64> = (1..=30).map(|d| r.daily_quota(d, 1000, 30, 450_000, 0.0)).collect();
        assert_eq!(quotas[0], 1000);
        for pair in quotas.windows(2) {
            assert!(pair[0] <= pair[1], "quota curve must be non-decreasing: {:?}", quotas);
        }
        assert!(quotas[29] > quotas[0]);
    }

    #[test]
    fn test_quota_beyond_curve_keeps_growing() {
        let mut r = Randomizer::from_seed(7);
        let last = r.daily_quota(30, 1000, 30, 450_000, 0.0);
        let beyond = r.daily_quota(33, 1000, 30, 450_000, 0.0);
        assert!(beyond > last);
        // 3-7% per day over three days
        assert!(beyond as f64 <= last as f64 * 1.07f64.powi(3) + 1.0);
    }

    #[test]
    fn test_quota_clamps_to_one() {
        let mut r = Randomizer::from_seed(7);
        assert!(r.daily_quota(1, 1, 1, 1, 1.0) >= 1);
    }

    #[test]
    fn test_split_bounds_and_sum() {
        let mut r = Randomizer::from_seed(42);
        for _ in 0..50 {
            let parts = r.split(4000, 4);
            assert_eq!(parts.iter().sum::<i64>(), 4000);
            for &p in &parts {
                assert!((800..=1200).contains(&p), "part {} out of ±20% band", p);
            }
        }
    }

    #[test]
    fn test_split_small_totals() {
        let mut r = Randomizer::from_seed(42);
        let parts = r.split(2, 4);
        assert_eq!(parts.iter().sum::<i64>(), 2);
        let parts = r.split(10, 3);
        assert_eq!(parts.iter().sum::<i64>(), 10);
        assert!(parts.iter().all(|&p| p >= 1));
    }

    #[test]
    fn test_split_with_cap_respects_percentage() {
        let mut r = Randomizer::from_seed(3);
        for _ in 0..50 {
            let parts = r.split_with_cap(1000, 5, 25.0, 0.5);
            assert_eq!(parts.iter().sum::<i64>(), 1000);
            for &p in &parts {
                assert!(p <= 250, "part {} exceeds the 25% cap", p);
                assert!(p >= 1);
            }
        }
    }

    #[test]
    fn test_hourly_low_volume_regime() {
        let mut r = Randomizer::from_seed(11);
        for _ in 0..20 {
            let hours = r.hourly_distribution(300, 0.7);
            assert_eq!(hours.iter().sum::<i64>(), 300);
            let nonzero = hours.iter().filter(|&&h| h > 0).count();
            assert!((4..=12).contains(&nonzero), "{} active hours", nonzero);
        }
    }

    #[test]
    fn test_hourly_mid_volume_regime() {
        let mut r = Randomizer::from_seed(11);
        for _ in 0..20 {
            let hours = r.hourly_distribution(1200, 0.5);
            assert_eq!(hours.iter().sum::<i64>(), 1200);
            let nonzero = hours.iter().filter(|&&h| h > 0).count();
            assert!((12..=18).contains(&nonzero), "{} active hours", nonzero);
        }
    }

    #[test]
    fn test_hourly_high_volume_peaks() {
        let mut r = Randomizer::from_seed(11);
        let hours = r.hourly_distribution(48_000, 0.0);
        assert_eq!(hours.iter().sum::<i64>(), 48_000);
        let night: i64 = NIGHT_HOURS.iter().map(|&h| hours[h]).sum();
        let peak: i64 = PEAK_HOURS.iter().map(|&h| hours[h]).sum();
        assert!(peak > night, "peaks {} should outweigh nights {}", peak, night);
        assert!(hours.iter().all(|&h| h > 0));
    }

    #[test]
    fn test_minute_distribution_sums() {
        let mut r = Randomizer::from_seed(5);
        for count in [0i64, 1, 7, 59, 60, 61, 500] {
            let minutes = r.minute_distribution(count);
            assert_eq!(minutes.len(), 60);
            assert_eq!(minutes.iter().sum::<i64>(), count);
            assert!(minutes.iter().all(|&m| m >= 0));
        }
    }

    #[test]
    fn test_same_seed_reproduces_sequence() {
        let mut a = Randomizer::from_seed(99);
        let mut b = Randomizer::from_seed(99);
        assert_eq!(
            a.daily_quota(5, 100, 10, 5000, 0.8),
            b.daily_quota(5, 100, 10, 5000, 0.8)
        );
        assert_eq!(a.split(1000, 4), b.split(1000, 4));
        assert_eq!(a.hourly_distribution(300, 0.7), b.hourly_distribution(300, 0.7));
        assert_eq!(a.minute_distribution(47), b.minute_distribution(47));
    }
}
