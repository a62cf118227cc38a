use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vitapkg::rif::{self, RIF_SIZE};

fn sample_rif() -> Vec<u8> {
    let mut rif = vec![0u8; RIF_SIZE];
    rif[0..8].copy_from_slice(&[0, 1, 0, 1, 0, 1, 0, 2]);
    rif[8..16].copy_from_slice(&0x0123_4567_89AB_CDEFu64.to_be_bytes());
    rif[0x10..0x34].copy_from_slice(b"UP0001-PCSE00001_00-0000000000000000");
    for (i, b) in rif[0x50..0x150].iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(31).wrapping_add(7);
    }
    rif
}

fn bench_zrif(c: &mut Criterion) {
    let record = sample_rif();
    let token = rif::encode_zrif(&record).unwrap();

    c.bench_function("zrif_encode", |b| b.iter(|| rif::encode_zrif(black_box(&record)).unwrap()));
    c.bench_function("zrif_decode", |b| b.iter(|| rif::decode_zrif(black_box(&token)).unwrap()));
}

fn bench_rif_name(c: &mut Criterion) {
    c.bench_function("rif_name", |b| b.iter(|| rif::rif_name(black_box(0), black_box(0x0123_4567_89AB_CDEF))));

    let name = rif::rif_name(1, 0x0123_4567_89AB_CDEF);
    c.bench_function("account_id_from_rif_name", |b| {
        b.iter(|| rif::account_id_from_rif_name(black_box(&name)).unwrap())
    });
}

criterion_group!(benches, bench_zrif, bench_rif_name);
criterion_main!(benches);
