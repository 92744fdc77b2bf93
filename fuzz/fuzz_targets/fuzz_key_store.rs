#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use qumail_km::{KeyRequest, KeyStore};

#[derive(Arbitrary, Debug)]
enum Op {
    Consume(u16),
    Peek(u16, u16),
}

#[derive(Arbitrary, Debug)]
struct StoreFuzzInput {
    length: u16,
    ops: Vec<Op>,
}

fuzz_target!(|input: StoreFuzzInput| {
    let store = KeyStore::in_memory();
    let created = match store.create(KeyRequest::new("Alice", "Bob", input.length as usize)) {
        Ok(created) => created,
        Err(_) => return,
    };
    let key_id = created.metadata.key_id.clone();

    let mut cursor = 0usize;
    for op in input.ops {
        match op {
            Op::Consume(n) => {
                if let Ok(consumption) = store.consume(&key_id, n as usize) {
                    assert_eq!(consumption.offset, cursor);
                    assert_eq!(
                        consumption.bytes,
                        created.material[cursor..cursor + n as usize]
                    );
                    cursor += n as usize;
                }
            }
            Op::Peek(offset, n) => {
                let _ = store.peek(&key_id, offset as usize, n as usize);
            }
        }
    }
    let meta = store.lookup(&key_id).expect("key must still exist");
    assert_eq!(meta.consumed, cursor);
    assert!(meta.consumed <= meta.length);
});
