#![no_main]

use libfuzzer_sys::fuzz_target;
use lorawan_storage::core::message::{Request, Response};
use lorawan_storage::core::urn::IdentityUrn;
use lorawan_storage::protocol::Dispatcher;
use once_cell::sync::Lazy;

static DISPATCHER: Lazy<Dispatcher> = Lazy::new(|| Dispatcher::in_memory(42, 42));

fuzz_target!(|data: &[u8]| {
    // decoders must reject short or garbled input without panicking
    let _ = Request::decode(data);
    let _ = Response::decode(data);

    let capacity = data.first().map(|b| *b as usize * 16).unwrap_or(0);
    if let Some(reply) = DISPATCHER.dispatch(data, capacity) {
        assert!(reply.len() <= capacity);
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = text.parse::<IdentityUrn>();
    }
});
