use state_machines::state_machine;

state_machine! {
    name: AnswerMachine,
    state: AnswerState,
    initial: Received,
    states: [
        Received,
        CacheCheck,
        CacheHit,
        Expanding,
        Retrieving,
        Reranking,
        Generating,
        CacheWrite,
        Done,
        RetrievalFailed,
        GenerationFailed
    ],
    events {
        check_cache { transition: { from: Received, to: CacheCheck } }
        hit { transition: { from: CacheCheck, to: CacheHit } }
        miss { transition: { from: CacheCheck, to: Expanding } }
        retrieve { transition: { from: Expanding, to: Retrieving } }
        rerank { transition: { from: Retrieving, to: Reranking } }
        generate { transition: { from: Reranking, to: Generating } }
        write_cache { transition: { from: Generating, to: CacheWrite } }
        finish {
            transition: { from: CacheHit, to: Done }
            transition: { from: CacheWrite, to: Done }
        }
        fail_retrieval {
            transition: { from: CacheCheck, to: RetrievalFailed }
            transition: { from: Retrieving, to: RetrievalFailed }
        }
        fail_generation { transition: { from: Generating, to: GenerationFailed } }
    }
}

pub fn received() -> AnswerMachine<(), Received> {
    AnswerMachine::new(())
}
