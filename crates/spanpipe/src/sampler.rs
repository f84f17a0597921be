//! Sampling policies.
//!
//! A [`Sampler`] decides at span-start time whether a span is recorded and
//! exported. The tracer holds the policy as a trait object, so swapping
//! policies never touches tracer code.

/// The single sampling capability: keep or drop, decided at start.
pub trait Sampler: Send + Sync {
    /// `parent_sampled` carries the parent's decision when the span has a
    /// parent, `None` for root spans.
    fn should_sample(&self, trace_id: u128, name: &str, parent_sampled: Option<bool>) -> bool;
}

/// Records every span. The reference policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnSampler;

impl Sampler for AlwaysOnSampler {
    fn should_sample(&self, _trace_id: u128, _name: &str, _parent_sampled: Option<bool>) -> bool {
        true
    }
}

/// Records no spans.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOffSampler;

impl Sampler for AlwaysOffSampler {
    fn should_sample(&self, _trace_id: u128, _name: &str, _parent_sampled: Option<bool>) -> bool {
        false
    }
}

/// Keeps a deterministic fraction of traces, keyed on the low 64 bits of
/// the trace id so every span of a trace gets the same decision.
#[derive(Debug, Clone, Copy)]
pub struct TraceIdRatioSampler {
    threshold: u64,
}

impl TraceIdRatioSampler {
    /// `ratio` is clamped to `0.0..=1.0`.
    pub fn new(ratio: f64) -> Self {
        let ratio = ratio.clamp(0.0, 1.0);
        let threshold = if ratio >= 1.0 {
            u64::MAX
        } else {
            (ratio * u64::MAX as f64) as u64
        };
        Self { threshold }
    }
}

impl Sampler for TraceIdRatioSampler {
    fn should_sample(&self, trace_id: u128, _name: &str, _parent_sampled: Option<bool>) -> bool {
        if self.threshold == u64::MAX {
            return true;
        }
        // Strict comparison so ratio 0.0 keeps nothing, including trace ids
        // whose low 64 bits are zero.
        (trace_id as u64) < self.threshold
    }
}

/// Honors the parent's decision when there is one; delegates root spans to
/// an inner policy.
pub struct ParentBasedSampler {
    root: Box<dyn Sampler>,
}

impl ParentBasedSampler {
    pub fn new(root: impl Sampler + 'static) -> Self {
        Self {
            root: Box::new(root),
        }
    }
}

impl Sampler for ParentBasedSampler {
    fn should_sample(&self, trace_id: u128, name: &str, parent_sampled: Option<bool>) -> bool {
        match parent_sampled {
            Some(decision) => decision,
            None => self.root.should_sample(trace_id, name, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_on_and_off() {
        assert!(AlwaysOnSampler.should_sample(1, "op", None));
        assert!(!AlwaysOffSampler.should_sample(1, "op", Some(true)));
    }

    #[test]
    fn ratio_bounds() {
        let all = TraceIdRatioSampler::new(1.0);
        let none = TraceIdRatioSampler::new(0.0);
        // 1 << 64 has all-zero low bits, the lowest possible sort key.
        for trace_id in [1_u128, 42, 1_u128 << 64, u64::MAX as u128, u128::MAX] {
            assert!(all.should_sample(trace_id, "op", None));
            assert!(!none.should_sample(trace_id, "op", None));
        }
    }

    #[test]
    fn ratio_is_deterministic_per_trace() {
        let sampler = TraceIdRatioSampler::new(0.5);
        let trace_id = 0x1234_5678_9abc_def0_u128;
        let first = sampler.should_sample(trace_id, "a", None);
        for _ in 0..10 {
            assert_eq!(sampler.should_sample(trace_id, "b", None), first);
        }
    }

    #[test]
    fn parent_based_honors_parent() {
        let sampler = ParentBasedSampler::new(AlwaysOffSampler);
        assert!(sampler.should_sample(1, "op", Some(true)));
        assert!(!sampler.should_sample(1, "op", Some(false)));
        // Root decision comes from the inner policy.
        assert!(!sampler.should_sample(1, "op", None));
    }
}
