#![no_main]
use libfuzzer_sys::fuzz_target;
use tilestore::{BincodeCodec, SchemaCodec};

// Arbitrary bytes must decode to a valid schema or fail cleanly
fuzz_target!(|data: &[u8]| {
    let codec = BincodeCodec::new();
    if let Ok(schema) = codec.decode(data) {
        assert!(schema.validate().is_ok());
        let bytes = codec.encode(&schema).expect("decoded schema re-encodes");
        assert_eq!(codec.decode(&bytes).ok(), Some(schema));
    }
});
