use asrpool::audio::MockAudioSource;
use asrpool::decoder::DecoderPool;
use asrpool::engine::{DecoderEngine, MockEngine, ModelPaths};
use asrpool::session::{ListeningMode, RecognitionSession, SessionConfig};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

const FRAME: usize = 160;

/// Utterances of two voiced frames and one silent frame, so every third
/// frame hands a slot to a hypothesis worker.
fn speech_script(utterances: usize) -> Vec<Vec<i16>> {
    let mut frames = Vec::with_capacity(utterances * 3);
    for _ in 0..utterances {
        frames.push(vec![3000; FRAME]);
        frames.push(vec![3000; FRAME]);
        frames.push(vec![0; FRAME]);
    }
    frames
}

fn mock_factory(_: usize) -> Box<dyn DecoderEngine> {
    Box::new(MockEngine::new())
}

fn run_session(slots: usize, frames: Vec<Vec<i16>>) -> u64 {
    let pool = DecoderPool::new(slots, &ModelPaths::new("/models/bench"), &mock_factory);
    let config = SessionConfig {
        mode: ListeningMode::Continuous,
        frame_size: FRAME,
        ..SessionConfig::default()
    };
    let session = RecognitionSession::new(
        pool,
        Box::new(MockAudioSource::new().with_frames(frames)),
        config,
    );
    if session.start_listening().is_err() {
        return 0;
    }
    session.wait_for_stop_timeout(Duration::from_secs(30));
    session.shutdown();
    session.stats().frames_decoded
}

fn bench_session_throughput(c: &mut Criterion) {
    let utterances = 200;
    let mut group = c.benchmark_group("session_throughput");
    group.throughput(Throughput::Elements((utterances * 3) as u64));
    group.sample_size(20);
    for slots in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(slots), &slots, |b, &slots| {
            b.iter(|| black_box(run_session(slots, speech_script(utterances))))
        });
    }
    group.finish();
}

fn bench_select_current(c: &mut Criterion) {
    let pool = DecoderPool::new(8, &ModelPaths::new("/models/bench"), &mock_factory);
    for slot in pool.slots() {
        if slot.start_utterance().is_err() {
            return;
        }
    }
    c.bench_function("select_current", |b| {
        b.iter(|| black_box(pool.select_current()))
    });
    c.bench_function("failover_from", |b| {
        b.iter(|| black_box(pool.failover_from(black_box(3))))
    });
}

criterion_group!(benches, bench_session_throughput, bench_select_current);
criterion_main!(benches);
