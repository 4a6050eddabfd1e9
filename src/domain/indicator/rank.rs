//! Cross-sectional percentile ranks.
//!
//! Given one value per instrument on the same date, each present value gets
//! `(lower + 0.5 * ties) / (n - 1) * 100`, where `n` counts present values and
//! `ties` excludes the value itself. A lone present value ranks 100. Absent
//! inputs stay absent and do not count toward `n`.

pub fn percentile_ranks(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let n = present.len();

    values
        .iter()
        .map(|value| {
            let v = (*value)?;
            if n == 1 {
                return Some(100.0);
            }
            let lower = present.iter().filter(|&&other| other < v).count();
            let ties = present.iter().filter(|&&other| other == v).count() - 1;
            Some((lower as f64 + 0.5 * ties as f64) / (n - 1) as f64 * 100.0)
        })
        .collect()
}
