use std::collections::VecDeque;

use crate::*;

// the first i s.t. v <= f[i]
pub fn upper_bound<T: PartialOrd>(f: &[T], v: &T) -> usize {
    let mut lo = 0;
    let mut hi = f.len().saturating_sub(1);
    while lo < hi {
        let mid = (lo + hi) / 2;
        if f[mid] < *v {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Piecewise-constant distribution sampled through its cdf.
#[derive(Clone, Debug)]
pub struct Distribution1D {
    pub pmf: Vec<f32>,
    cdf: Vec<f32>,
    pub int_f: f32,
}

impl Distribution1D {
    pub fn new(f: &[f32]) -> Option<Self> {
        let mut f: Vec<_> = Vec::from(f);
        let int_f: f32 = f.iter().copied().sum::<f32>();
        if int_f <= 0.0 || !int_f.is_finite() {
            return None;
        }
        f.iter_mut().for_each(|x| *x /= int_f);
        let mut cdf = Vec::with_capacity(f.len() + 1);
        let mut sum = 0.0;
        cdf.push(0.0);
        for x in &f {
            sum += *x;
            cdf.push(sum);
        }
        Some(Self { pmf: f, cdf, int_f })
    }
    pub fn len(&self) -> usize {
        self.pmf.len()
    }
    pub fn is_empty(&self) -> bool {
        self.pmf.is_empty()
    }
    pub fn pdf_discrete(&self, idx: usize) -> f32 {
        self.pmf[idx]
    }
    pub fn sample_discrete(&self, u: f32) -> (usize, f32) {
        let i = upper_bound(&self.cdf[..], &u);
        let i = if i == 0 { 0 } else { i - 1 };
        let i = i.min(self.pmf.len() - 1);
        (i, self.pmf[i])
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AliasEntry {
    /// probability of keeping the bucket's own index
    pub q: f32,
    pub alias: u32,
    /// normalized weight of the bucket's own index
    pub pdf: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct AliasSample {
    pub index: usize,
    pub pdf: f32,
    /// the second random number, remapped back to [0,1) for reuse
    pub remapped: f32,
}

/// Walker alias table over discrete weights; O(1) sampling.
#[derive(Clone, Debug)]
pub struct AliasTable {
    pub entries: Vec<AliasEntry>,
}

impl AliasTable {
    pub fn new(weights: &[f32]) -> Option<Self> {
        if weights.is_empty() {
            return None;
        }
        let sum: f32 = weights.iter().copied().sum::<f32>();
        if sum <= 0.0 || !sum.is_finite() {
            return None;
        }
        let n = weights.len() as f32;
        let mut prob: Vec<_> = weights.iter().map(|x| *x / sum * n).collect();
        let mut small = VecDeque::new();
        let mut large = VecDeque::new();
        for (i, p) in prob.iter().enumerate() {
            if *p >= 1.0 {
                large.push_back(i);
            } else {
                small.push_back(i);
            }
        }
        let mut entries: Vec<_> = weights
            .iter()
            .map(|w| AliasEntry {
                q: 1.0,
                alias: 0,
                pdf: *w / sum,
            })
            .collect();
        while !small.is_empty() && !large.is_empty() {
            let (Some(l), Some(g)) = (small.pop_front(), large.pop_front()) else {
                break;
            };
            entries[l].q = prob[l];
            entries[l].alias = g as u32;
            prob[g] = (prob[g] + prob[l]) - 1.0;
            if prob[g] < 1.0 {
                small.push_back(g);
            } else {
                large.push_back(g);
            }
        }
        // leftovers are numerically 1
        for i in large.into_iter().chain(small) {
            entries[i].q = 1.0;
            entries[i].alias = i as u32;
        }
        Some(Self { entries })
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn pdf(&self, i: usize) -> f32 {
        self.entries[i].pdf
    }
    pub fn sample(&self, u: Vec2) -> AliasSample {
        let size = self.entries.len();
        let idx = ((u.x * size as f32) as usize).min(size - 1);
        let entry = &self.entries[idx];
        let (index, remapped) = if u.y < entry.q {
            (idx, u.y / entry.q)
        } else {
            let q = entry.q;
            (entry.alias as usize, ((u.y - q) / (1.0 - q)).min(1.0 - f32::EPSILON))
        };
        AliasSample {
            index,
            pdf: self.entries[index].pdf,
            remapped,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{thread_rng, Rng};
    use statrs::assert_almost_eq;

    #[test]
    fn test_distr() {
        let dist = Distribution1D::new(&[0.5, 0.5, 1.0, 1.0]).unwrap();
        let f_int: f32 = 3.0;
        assert_almost_eq!(dist.pdf_discrete(0) as f64, (0.5 / f_int) as f64, 0.001f64);
        assert_almost_eq!(dist.pdf_discrete(3) as f64, (1.0 / f_int) as f64, 0.001f64);
        {
            let (i, pdf) = dist.sample_discrete(0.7);
            assert_eq!(i, 3);
            assert_almost_eq!(pdf as f64, (1.0 / f_int) as f64, 0.001f64);
        }
        {
            let (i, pdf) = dist.sample_discrete(0.1);
            assert_eq!(i, 0);
            assert_almost_eq!(pdf as f64, (0.5 / f_int) as f64, 0.001f64);
        }
        assert!(Distribution1D::new(&[0.0, 0.0]).is_none());
    }
    #[test]
    fn upper_bounds() {
        assert_eq!(upper_bound(&[0, 1, 2, 3, 4, 5, 6, 7], &7), 7);
        assert_eq!(
            upper_bound(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8], &0.12),
            1
        );
        assert_eq!(
            upper_bound(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8], &0.72),
            7
        );
        assert_eq!(
            upper_bound(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8], &0.9),
            7
        );
    }
    #[test]
    fn alias_table() {
        let mut rng = thread_rng();
        let weights = (0..100).map(|_| rng.gen::<f32>()).collect::<Vec<_>>();
        let sum = weights.iter().sum::<f32>();
        let table = AliasTable::new(&weights).unwrap();
        let mut h = vec![0.0f32; weights.len()];
        for (i, e) in table.entries.iter().enumerate() {
            h[i] += e.q;
            h[e.alias as usize] += 1.0 - e.q;
        }
        h.iter_mut().for_each(|x| *x /= weights.len() as f32);
        for (i, (a, w)) in h.iter().zip(weights.iter()).enumerate() {
            assert!((a - w / sum).abs() < 1e-3);
            assert_almost_eq!(table.pdf(i) as f64, (w / sum) as f64, 1e-6);
        }
    }
    #[test]
    fn alias_sample_frequencies() {
        let table = AliasTable::new(&[1.0, 0.0, 3.0]).unwrap();
        let mut rng = thread_rng();
        let mut counts = [0usize; 3];
        let n = 100000;
        for _ in 0..n {
            let s = table.sample(vec2(rng.gen(), rng.gen()));
            assert!((0.0..1.0).contains(&s.remapped));
            assert!(s.pdf > 0.0);
            counts[s.index] += 1;
        }
        assert_eq!(counts[1], 0);
        assert_almost_eq!(counts[0] as f64 / n as f64, 0.25, 0.01);
        assert_almost_eq!(counts[2] as f64 / n as f64, 0.75, 0.01);
    }
}
