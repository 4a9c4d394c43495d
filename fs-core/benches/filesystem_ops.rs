use chainfs::{FileSystem, FsConfig, MemoryStore, SeekMode};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn fresh_fs() -> FileSystem<MemoryStore> {
    let mut fs = FileSystem::new(MemoryStore::new(), FsConfig::default());
    fs.create_disk(4 << 20).unwrap();
    fs.format(512).unwrap();
    fs
}

fn benchmark_file_operations(c: &mut Criterion) {
    // 64 KiB spans several index table links at the default geometry
    let data = vec![0x5Au8; 64 * 1024];

    c.bench_function("chained_write_64kb", |b| {
        b.iter(|| {
            let mut fs = fresh_fs();
            fs.touch("bench").unwrap();
            fs.open("w", "bench").unwrap();
            fs.write("bench", black_box(&data)).unwrap();
            fs.close("bench").unwrap();
        });
    });

    let mut fs = fresh_fs();
    fs.touch("bench").unwrap();
    fs.open("rw", "bench").unwrap();
    fs.write("bench", &data).unwrap();

    c.bench_function("chained_read_64kb", |b| {
        b.iter(|| {
            fs.seek("bench", SeekMode::Absolute, 0).unwrap();
            black_box(fs.read("bench", data.len()).unwrap());
        });
    });

    c.bench_function("mkdir_rmdir_tree", |b| {
        b.iter(|| {
            let mut fs = fresh_fs();
            fs.mkdir("a").unwrap();
            fs.mkdir("a/b").unwrap();
            for i in 0..8 {
                fs.touch(&format!("a/b/f{}", i)).unwrap();
            }
            fs.rmdir("a").unwrap();
        });
    });
}

criterion_group!(benches, benchmark_file_operations);
criterion_main!(benches);
