/// Reference partition hash from spec §4.1: a 32-bit DJB-style
/// accumulator seeded at 23, `h = (h<<5) - h + codepoint` (i.e. `31*h +
/// codepoint` under 32-bit wraparound), absolute-valued before modulo.
/// Deterministic and stable across processes so a given aggregate id
/// always routes to the same partition.
pub fn stable_hash(aggregate_id: &str) -> u32 {
    let mut h: i32 = 23;
    for c in aggregate_id.chars() {
        h = h.wrapping_mul(31).wrapping_add(c as i32);
    }
    h.unsigned_abs()
}

pub fn partition_for(aggregate_id: &str, partition_count: usize) -> usize {
    debug_assert!(partition_count > 0, "partition_count must be positive");
    (stable_hash(aggregate_id) as usize) % partition_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let id = "aggregate-42";
        assert_eq!(stable_hash(id), stable_hash(id));
    }

    #[test]
    fn routes_consistently_across_restarts() {
        let id = "order-abc-123";
        let first = partition_for(id, 8);
        let second = partition_for(id, 8);
        assert_eq!(first, second);
    }

    #[test]
    fn distribution_is_roughly_uniform() {
        let partitions = 4usize;
        let mut counts = vec![0usize; partitions];
        for i in 0..10_000 {
            let id = format!("aggregate-{i}");
            counts[partition_for(&id, partitions)] += 1;
        }
        let mean = 10_000 / partitions;
        for count in counts {
            let deviation = (count as i64 - mean as i64).unsigned_abs() as usize;
            assert!(
                deviation < mean,
                "partition distribution deviated too far from uniform: {count} vs mean {mean}"
            );
        }
    }
}
