#[derive(Debug, Clone, Default)]
pub struct Histogram {
    pub total_samples: usize,
    pub buckets: Vec<usize>,
}

impl Histogram {
    /// Builds a histogram from any iterator yielding items than can be converted to `usize`.
    ///
    /// The values yielded by the iterator are used to directly index
    /// into the histogram buckets.  Values past the last bucket are
    /// counted in the last bucket.
    pub fn from_iter<T, Itr>(values: Itr, bucket_count: usize) -> Self
    where
        T: Into<usize>,
        Itr: std::iter::Iterator<Item = T>,
    {
        assert!(bucket_count > 0);
        let mut hist = Histogram {
            total_samples: 0,
            buckets: vec![0; bucket_count],
        };
        for v in values {
            hist.total_samples += 1;
            hist.buckets[v.into().min(bucket_count - 1)] += 1;
        }
        hist
    }

    /// Number of samples in buckets `[0, bucket)`.
    pub fn sum_under(&self, bucket: usize) -> usize {
        self.buckets.iter().take(bucket).sum()
    }

    /// Index of the first bucket at which the cumulative count reaches
    /// `fraction` of all samples.
    pub fn percentile(&self, fraction: f32) -> usize {
        if self.total_samples == 0 {
            return 0;
        }
        let target = (self.total_samples as f64 * fraction.max(0.0).min(1.0) as f64).ceil() as usize;
        let target = target.max(1);
        let mut sum = 0;
        for (i, count) in self.buckets.iter().enumerate() {
            sum += count;
            if sum >= target {
                return i;
            }
        }
        self.buckets.len() - 1
    }

    pub fn median(&self) -> usize {
        self.percentile(0.5)
    }
}
