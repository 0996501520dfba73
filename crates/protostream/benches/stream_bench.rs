use std::path::Path;

use backend::{BackendMut, MmapBackend, ReadAppend, SyscallBackend};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use protostream::{Cache, FullCache, MmapReader, OffsetsOnlyCache, RawFactory, Stream, SyscallReader};
use tempfile::tempdir;

const FRAMES: u64 = 10_000;
const FRAMES_PER_KF: u32 = 10;
const KF_SIZE: usize = 1_000;
const DELTA_SIZE: usize = 50;

fn fill<B: BackendMut, C: Cache>(stream: &mut Stream<B, C>) {
    let keyframe = vec![b'k'; KF_SIZE];
    let delta = vec![b'd'; DELTA_SIZE];
    for i in 0..FRAMES {
        if i % u64::from(FRAMES_PER_KF) == 0 {
            stream.append_keyframe(&keyframe).unwrap();
        } else {
            stream.append_delta(&delta).unwrap();
        }
    }
}

fn write_file(path: &Path) {
    let mut stream =
        Stream::<MmapBackend<ReadAppend>, OffsetsOnlyCache>::create(path, FRAMES_PER_KF, b"bench").unwrap();
    fill(&mut stream);
}

fn append_mmap(c: &mut Criterion) {
    c.bench_function("append_mmap_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let stream = Stream::<MmapBackend<ReadAppend>, OffsetsOnlyCache>::create(
                    dir.path().join("bench.ps"),
                    FRAMES_PER_KF,
                    b"bench",
                )
                .unwrap();
                (dir, stream)
            },
            |(_dir, mut stream)| fill(&mut stream),
            BatchSize::SmallInput,
        );
    });
}

fn append_syscall(c: &mut Criterion) {
    c.bench_function("append_syscall_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let stream = Stream::<SyscallBackend<ReadAppend>, FullCache>::create(
                    dir.path().join("bench.ps"),
                    FRAMES_PER_KF,
                    b"bench",
                )
                .unwrap();
                (dir, stream)
            },
            |(_dir, mut stream)| fill(&mut stream),
            BatchSize::SmallInput,
        );
    });
}

fn iterate_all(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.ps");
    write_file(&path);

    c.bench_function("iterate_mmap_10k", |b| {
        b.iter(|| {
            let reader = MmapReader::open(&path).unwrap();
            let mut bytes = 0usize;
            for keyframe in reader.keyframes() {
                let keyframe = keyframe.unwrap();
                bytes += keyframe.raw().unwrap().len();
                for delta in keyframe.deltas().unwrap() {
                    bytes += delta.unwrap().raw().unwrap().len();
                }
            }
            criterion::black_box(bytes)
        });
    });
}

fn random_keyframe(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.ps");
    write_file(&path);
    let count = FRAMES / u64::from(FRAMES_PER_KF);

    c.bench_function("random_keyframe_cold_syscall", |b| {
        b.iter(|| {
            let reader = SyscallReader::open(&path).unwrap();
            for i in 0..100 {
                let id = (i * 389) % count;
                let keyframe = reader.keyframe(id).unwrap().unwrap();
                criterion::black_box(keyframe.get::<RawFactory>().unwrap());
            }
        });
    });

    c.bench_function("random_keyframe_warm_mmap", |b| {
        let reader = MmapReader::open(&path).unwrap();
        b.iter(|| {
            for i in 0..100 {
                let id = (i * 389) % count;
                criterion::black_box(reader.offset_of_keyframe(id).unwrap());
            }
        });
    });
}

criterion_group!(benches, append_mmap, append_syscall, iterate_all, random_keyframe);

criterion_main!(benches);
