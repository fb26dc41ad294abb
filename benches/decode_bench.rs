use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ofw::container::{parse, MemorySink, RawBlock};
use ofw::{checksum, decrypt, encrypt, CipherState, HEADER_KEY, SIGNATURE};

fn bench_keystream(c: &mut Criterion) {
    let key = HEADER_KEY;
    let data = vec![0x5au8; 1024 * 1024];

    c.bench_function("decrypt_1mb", |b| {
        b.iter(|| {
            let mut state = CipherState::new();
            decrypt(black_box(&data), &key, &mut state)
        })
    });
}

fn bench_checksum(c: &mut Criterion) {
    let data = vec![0xa7u8; 1024 * 1024];
    c.bench_function("checksum_1mb", |b| b.iter(|| checksum(black_box(&data))));
}

fn bench_parse_container(c: &mut Criterion) {
    // A one-leaf container with a 1 MiB payload, built the same way the
    // integration fixtures are.
    let key = [0x11u8, 0x47, 0x03, 0xc2, 0x99, 0x08, 0x5e, 0x31];
    let payload = vec![0x42u8; 1024 * 1024];

    let mut plain = SIGNATURE.to_vec();
    plain.extend_from_slice(&payload);
    let mut state = CipherState::new();
    let leaf = encrypt(&plain, &key, &mut state);

    let mut hdr = vec![0u8; 0x200];
    hdr[..16].copy_from_slice(&SIGNATURE);
    hdr[0x10..0x14].copy_from_slice(&0x200u32.to_le_bytes());
    hdr[0x1c..0x20].copy_from_slice(&0x58u32.to_le_bytes());
    hdr[0x20..0x24].copy_from_slice(&0x100u32.to_le_bytes());
    hdr[0x30..0x34].copy_from_slice(b"FWIM");
    hdr[0x59..0x5d].copy_from_slice(b"blob");
    hdr[0x100..0x104].copy_from_slice(&(leaf.len() as u32).to_le_bytes());
    hdr[0x104..0x108].copy_from_slice(&0x200u32.to_le_bytes());
    hdr[0x108..0x10c].copy_from_slice(&checksum(&leaf).to_le_bytes());
    let crc = checksum(&hdr[0x18..]);
    hdr[0x14..0x18].copy_from_slice(&crc.to_le_bytes());

    let mut state = CipherState::new();
    let mut image = encrypt(&hdr, &HEADER_KEY, &mut state);
    image.extend_from_slice(&leaf);

    c.bench_function("parse_container_1mb_leaf", |b| {
        b.iter(|| {
            let mut sink = MemorySink::default();
            parse(RawBlock::new(black_box(&image)), &mut sink).unwrap()
        })
    });
}

criterion_group!(benches, bench_keystream, bench_checksum, bench_parse_container);
criterion_main!(benches);
