use interlock_core::{compose, decompose, Envelope};
use rand::{thread_rng, Rng};

#[test]
fn fuzz_decode_envelope_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..512);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let _ = Envelope::decode(&data);
    }
}

#[test]
fn fuzz_decompose_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..512);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let _ = decompose(&data);
    }
}

#[test]
fn random_mutation_of_valid_blob_is_handled() {
    let mut rng = thread_rng();
    let blob = compose(&[b"password".as_slice(), b"nonce".as_slice(), &[7u8; 32]]);

    for _ in 0..1_000 {
        let mut mutated = blob.clone();
        let flip_count = rng.gen_range(1..6);
        for _ in 0..flip_count {
            let idx = rng.gen_range(0..mutated.len());
            mutated[idx] ^= rng.gen::<u8>();
        }
        if let Ok(fields) = decompose(&mutated) {
            // Whatever decodes must account for every byte.
            let payload: usize = fields.iter().map(Vec::len).sum();
            assert_eq!(4 + fields.len() * 4 + payload, mutated.len());
        }
    }
}
