//! Interpreter lifecycle: Uninitialized → Running → Finalized.
//!
//! Kept as a single test so the transitions run in order in one process.

mod common;

use common::{fixtures_dir, MODULE};
use pyhost::{BridgeConfig, BridgeError, FunctionBinding, InterpreterState};

#[test]
fn test_full_lifecycle() {
    // Before start: every operation fails without touching the interpreter.
    assert_eq!(pyhost::state(), InterpreterState::Uninitialized);
    assert_eq!(
        pyhost::call_function(MODULE, "detect", &[1.0, 2.0]),
        Err(BridgeError::InterpreterNotRunning)
    );
    assert_eq!(
        pyhost::append_module_search_path(fixtures_dir()),
        Err(BridgeError::InterpreterNotRunning)
    );
    assert_eq!(
        FunctionBinding::bind(MODULE, "detect").unwrap_err(),
        BridgeError::InterpreterNotRunning
    );
    assert_eq!(
        pyhost::with_interpreter(|_py| Ok(())),
        Err(BridgeError::InterpreterNotRunning)
    );
    assert_eq!(pyhost::stop(), Err(BridgeError::InterpreterNotRunning));
    assert_eq!(pyhost::live_owned_handles(), 0);

    // Running.
    let config = BridgeConfig::default().with_search_path(fixtures_dir());
    pyhost::start(&config).expect("first start succeeds");
    assert_eq!(pyhost::state(), InterpreterState::Running);

    let err = pyhost::start(&config).unwrap_err();
    assert_eq!(err, BridgeError::AlreadyRunning);
    assert!(err.is_fatal());

    let binding = FunctionBinding::bind(MODULE, "detect").expect("bind detect");
    let mut input = vec![0.0; 10];
    input[7] = 99.0;
    assert_eq!(binding.call(&input).unwrap(), vec![7]);
    assert_eq!(pyhost::call_function(MODULE, "detect", &input).unwrap(), vec![7]);

    // Finalized.
    pyhost::stop().expect("stop succeeds");
    assert_eq!(pyhost::state(), InterpreterState::Finalized);
    assert_eq!(binding.call(&input), Err(BridgeError::InterpreterNotRunning));
    assert_eq!(
        pyhost::call_function(MODULE, "detect", &input),
        Err(BridgeError::InterpreterNotRunning)
    );
    assert_eq!(pyhost::stop(), Err(BridgeError::InterpreterNotRunning));

    // Restart is refused unless explicitly allowed.
    assert_eq!(pyhost::start(&config), Err(BridgeError::RestartRefused));
    assert_eq!(pyhost::state(), InterpreterState::Finalized);

    let restart = BridgeConfig::default()
        .with_search_path(fixtures_dir())
        .with_allow_reinitialize(true)
        .with_print_tracebacks(true);
    pyhost::start(&restart).expect("opted-in restart succeeds");
    assert_eq!(pyhost::state(), InterpreterState::Running);
    assert_eq!(pyhost::call_function(MODULE, "detect", &input).unwrap(), vec![7]);

    // A binding from the first run never reaches the new interpreter.
    assert_eq!(binding.call(&input), Err(BridgeError::InterpreterNotRunning));
    drop(binding);
    assert_eq!(pyhost::live_owned_handles(), 0);

    let err = pyhost::call_function(MODULE, "boom", &input).unwrap_err();
    assert!(matches!(err, BridgeError::ForeignRuntime(ref e) if e.type_name == "ValueError"));
    assert_eq!(pyhost::live_owned_handles(), 0);

    let rebound = FunctionBinding::bind(MODULE, "detect").expect("bind after restart");
    assert_eq!(rebound.call(&input).unwrap(), vec![7]);
    drop(rebound);

    pyhost::stop().expect("second stop succeeds");
    assert_eq!(pyhost::state(), InterpreterState::Finalized);
    assert_eq!(pyhost::live_owned_handles(), 0);
}
