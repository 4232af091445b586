use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;

use adsynth_core::config::ThreadCount;
use adsynth_core::part::PartAudioEvent;
use adsynth_core::part::PartEvent;
use adsynth_core::part_group::ParallelismOptions;
use adsynth_core::part_group::PartGroup;
use adsynth_core::part_group::PartGroupConfig;
use adsynth_core::part_group::SynthEvent;
use adsynth_core::AudioPipe;

fn stress_group(group: &mut PartGroup, keys_per_part: u8) {
    let mut buffer = vec![0.0; 512];
    for part in 0..group.part_count() as u32 {
        for key in 0..keys_per_part {
            group.send_event(SynthEvent::Part(
                part,
                PartEvent::Audio(PartAudioEvent::NoteOn {
                    key: 24 + (key * 3) % 96,
                    vel: 127,
                }),
            ));
        }
    }

    // Roughly one second at 44.1kHz
    for _ in 0..172 {
        group.read_samples(&mut buffer);
    }

    group.send_event(SynthEvent::AllParts(PartEvent::Audio(
        PartAudioEvent::AllNotesKilled,
    )));
    group.read_samples(&mut buffer);
}

fn group(part: ThreadCount) -> PartGroup {
    PartGroup::new(PartGroupConfig {
        parallelism: ParallelismOptions {
            part,
            pad: ThreadCount::None,
        },
        ..Default::default()
    })
    .unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut c = c.benchmark_group("polyphony");
    c.sample_size(10);

    c.bench_function("render 1s (16 parts, 8 keys, single threaded)", |f| {
        let mut group = group(ThreadCount::None);
        f.iter(|| stress_group(&mut group, 8))
    });

    c.bench_function("render 1s (16 parts, 8 keys, multithreaded)", |f| {
        let mut group = group(ThreadCount::Auto);
        f.iter(|| stress_group(&mut group, 8))
    });

    c.bench_function("render 1s (16 parts, 32 keys, multithreaded)", |f| {
        let mut group = group(ThreadCount::Auto);
        f.iter(|| stress_group(&mut group, 32))
    });

    c.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
