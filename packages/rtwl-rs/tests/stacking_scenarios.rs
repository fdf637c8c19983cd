use rtwl_rs::{
    BufferConfig, Chunk, GridPoint, MaxExtractor, OperatorSpec, PreprocessingPreset,
    ReadinessPolicy, RegionStacker, RtwlConfig, StackedTrace, TravelTimeSnapshot,
    TravelTimeTable,
};
use std::sync::Arc;

const DT: f64 = 0.01;

/// Two stations, three points. Points 0 and 1 carry the true delays; point 2
/// ignores station B's 0.05 s delay.
fn two_station_snapshot() -> Arc<TravelTimeSnapshot> {
    let table = TravelTimeTable::new(
        vec!["A".into(), "B".into()],
        vec![
            GridPoint::new(0.0, 0.0, 0.0),
            GridPoint::new(1.0, 0.0, 0.0),
            GridPoint::new(5.0, 5.0, 5.0),
        ],
        vec![vec![0.0, 0.0, 0.0], vec![0.05, 0.05, 0.0]],
    )
    .unwrap();
    Arc::new(TravelTimeSnapshot::build(1, table, DT, 1).unwrap())
}

fn config() -> RtwlConfig {
    let mut config = RtwlConfig::offline(DT);
    config.safety_margin = 0.1;
    config.max_buffer_length = 10.0;
    config.preprocessing = PreprocessingPreset::Passthrough;
    config
}

fn impulse(station: &str, at: usize) -> Chunk {
    let mut samples = vec![0.0f32; 200];
    samples[at] = 1.0;
    Chunk::new(station, 100.0, DT, samples)
}

fn argmax(samples: &[f32]) -> (usize, f32) {
    samples
        .iter()
        .enumerate()
        .fold((0, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
}

fn stack_all(stacker: &mut RegionStacker, rounds: &[Vec<Chunk>]) -> Vec<StackedTrace> {
    let mut traces = Vec::new();
    for round in rounds {
        for chunk in round {
            stacker.distribute(chunk);
        }
        traces.extend(stacker.stack());
    }
    traces
}

/// Concatenate one point's traces, checking they are contiguous
fn joined(traces: &[StackedTrace], point: usize) -> (i64, Vec<f32>) {
    let mut mine: Vec<&StackedTrace> = traces.iter().filter(|t| t.point == point).collect();
    mine.sort_by_key(|t| t.start_tick());
    let first = mine.first().map(|t| t.start_tick()).unwrap_or_default();
    let mut next = first;
    let mut samples = Vec::new();
    for trace in mine {
        assert_eq!(trace.start_tick(), next, "point {} has a hole or overlap", point);
        next += trace.samples.len() as i64;
        samples.extend_from_slice(&trace.samples);
    }
    (first, samples)
}

#[test]
fn test_delayed_impulses_align_on_true_points() {
    let snapshot = two_station_snapshot();
    let mut stacker = RegionStacker::new(0, snapshot, &config()).unwrap();

    // B records the same impulse 0.05 s later
    let rounds = vec![vec![impulse("A", 50), impulse("B", 55)]];
    let traces = stack_all(&mut stacker, &rounds);
    assert_eq!(traces.len(), 3);

    for point in [0, 1] {
        let (start, samples) = joined(&traces, point);
        let (i, peak) = argmax(&samples);
        assert_eq!(peak, 2.0, "point {}", point);
        assert_eq!(start + i as i64, 10_050);
    }

    let (start, samples) = joined(&traces, 2);
    let (_, peak) = argmax(&samples);
    assert_eq!(peak, 1.0);
    let ones: Vec<i64> = samples
        .iter()
        .enumerate()
        .filter(|(_, &v)| v == 1.0)
        .map(|(i, _)| start + i as i64)
        .collect();
    assert_eq!(ones, vec![10_050, 10_055]);
}

#[test]
fn test_max_picks_aligned_point() {
    let snapshot = two_station_snapshot();
    let mut stacker = RegionStacker::new(0, snapshot.clone(), &config()).unwrap();
    let traces = stack_all(&mut stacker, &[vec![impulse("A", 50), impulse("B", 55)]]);

    let mut max = MaxExtractor::new(
        snapshot,
        &BufferConfig::new(DT, 10.0),
        10,
        ReadinessPolicy::Strict,
        &[OperatorSpec::Scale { factor: 1.0 }],
        &[],
    )
    .unwrap();
    for trace in &traces {
        assert!(max.push(trace).unwrap());
    }

    let window = max.tick().unwrap().expect("all three points are ready");
    let peak = window.peak().unwrap();
    assert_eq!(peak.amplitude, 2.0);
    assert_eq!(peak.point, 0);
    assert!((peak.time - 100.5).abs() < 1e-9);
    assert_eq!((peak.x, peak.y, peak.z), (0.0, 0.0, 0.0));
    assert_eq!(window.x.len(), window.max.len());
}

#[test]
fn test_chunked_delivery_matches_single_delivery() {
    let whole = vec![vec![impulse("A", 50), impulse("B", 55)]];
    let a = impulse("A", 50).split(4);
    let b = impulse("B", 55).split(4);
    let rounds: Vec<Vec<Chunk>> = a
        .into_iter()
        .zip(b)
        .map(|(a, b)| vec![a, b])
        .collect();

    let mut single = RegionStacker::new(0, two_station_snapshot(), &config()).unwrap();
    let mut chunked = RegionStacker::new(0, two_station_snapshot(), &config()).unwrap();
    let single_traces = stack_all(&mut single, &whole);
    let chunked_traces = stack_all(&mut chunked, &rounds);
    assert!(chunked_traces.len() > single_traces.len());

    for point in 0..3 {
        assert_eq!(joined(&single_traces, point), joined(&chunked_traces, point));
    }
}

#[test]
fn test_strict_join_stalls_on_silent_station() {
    let mut strict = RegionStacker::new(0, two_station_snapshot(), &config()).unwrap();
    assert!(stack_all(&mut strict, &[vec![impulse("A", 50)]]).is_empty());

    let mut lenient_config = config();
    lenient_config.readiness_policy = ReadinessPolicy::Lenient;
    let mut lenient = RegionStacker::new(0, two_station_snapshot(), &lenient_config).unwrap();
    let traces = stack_all(&mut lenient, &[vec![impulse("A", 50)]]);
    assert_eq!(traces.len(), 3);
    assert!(traces.iter().all(|t| t.stations == 1));
}
