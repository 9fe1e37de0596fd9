use state_machines::state_machine;

state_machine! {
    name: DocumentMachine,
    state: DocumentState,
    initial: Ready,
    states: [Ready, Hashed, Skipped, Chunked, Embedded, Committed, Failed],
    events {
        fingerprint { transition: { from: Ready, to: Hashed } }
        skip { transition: { from: Hashed, to: Skipped } }
        split { transition: { from: Hashed, to: Chunked } }
        embed { transition: { from: Chunked, to: Embedded } }
        commit { transition: { from: Embedded, to: Committed } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Hashed, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Embedded, to: Failed }
        }
    }
}

pub fn ready() -> DocumentMachine<(), Ready> {
    DocumentMachine::new(())
}
