use crate::stats::MonthlyStatistic;

/// Direction of the merged-PR trend line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Rising,
    Flat,
    Falling,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Rising => write!(f, "RISING"),
            TrendDirection::Flat => write!(f, "FLAT"),
            TrendDirection::Falling => write!(f, "FALLING"),
        }
    }
}

/// Least-squares line over monthly merged PR counts, indexed by position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    /// Change in merged PRs per emitted month
    pub slope: f64,
}

impl Trend {
    /// Slopes within this distance of zero count as flat.
    const FLAT_EPSILON: f64 = 0.05;

    pub fn direction(&self) -> TrendDirection {
        if self.slope > Self::FLAT_EPSILON {
            TrendDirection::Rising
        } else if self.slope < -Self::FLAT_EPSILON {
            TrendDirection::Falling
        } else {
            TrendDirection::Flat
        }
    }
}

/// Everything shown to the operator after an analysis run.
#[derive(Debug)]
pub struct Report {
    /// Repository name (`owner/repo`), when known
    pub repository: Option<String>,
    /// Records inside the date window
    pub records_analyzed: usize,
    /// Statistics built from an incomplete fetch
    pub partial: bool,
    pub months: Vec<MonthlyStatistic>,
    /// None with fewer than two months
    pub merge_trend: Option<Trend>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_direction() {
        let trend = |slope| Trend { slope };
        assert_eq!(trend(1.5).direction(), TrendDirection::Rising);
        assert_eq!(trend(0.0).direction(), TrendDirection::Flat);
        assert_eq!(trend(0.01).direction(), TrendDirection::Flat);
        assert_eq!(trend(-2.0).direction(), TrendDirection::Falling);
    }

    #[test]
    fn test_trend_direction_display() {
        assert_eq!(TrendDirection::Rising.to_string(), "RISING");
        assert_eq!(TrendDirection::Flat.to_string(), "FLAT");
        assert_eq!(TrendDirection::Falling.to_string(), "FALLING");
    }
}
