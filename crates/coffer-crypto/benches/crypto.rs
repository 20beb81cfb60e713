use coffer_crypto::{cipher_by_name, cipher_names, EncryptionKey};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = ["xchacha20-poly1305", "aes-256-gcm"])]
fn bench_encrypt_block(bencher: divan::Bencher, name: &str) {
    let cipher = cipher_by_name(name).unwrap();
    let key = EncryptionKey::generate();
    let data = make_data(4096);
    bencher
        .counter(divan::counter::BytesCount::new(4096usize))
        .bench(|| {
            cipher
                .encrypt(divan::black_box(&key), divan::black_box(&data))
                .unwrap()
        });
}

#[divan::bench(args = ["xchacha20-poly1305", "aes-256-gcm"])]
fn bench_decrypt_block(bencher: divan::Bencher, name: &str) {
    let cipher = cipher_by_name(name).unwrap();
    let key = EncryptionKey::generate();
    let encrypted = cipher.encrypt(&key, &make_data(4096)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(4096usize))
        .bench(|| {
            cipher
                .decrypt(divan::black_box(&key), divan::black_box(&encrypted))
                .unwrap()
        });
}

fn main() {
    // Exercise every registered suite once so a broken suite fails loudly
    // even when benches run filtered.
    for name in cipher_names() {
        let cipher = cipher_by_name(name).unwrap();
        let key = EncryptionKey::generate();
        let ct = cipher.encrypt(&key, b"bench-selftest").unwrap();
        assert_eq!(cipher.decrypt(&key, &ct).unwrap(), b"bench-selftest");
    }
    divan::main();
}
