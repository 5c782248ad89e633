//! End-to-end `call_function` behavior against the fixture module.

mod common;

use common::MODULE;
use pyhost::{
    call_function, call_function_as, invoke, with_interpreter, BridgeError, FunctionBinding,
    MarshalError, ModuleHandle,
};

fn spike_input() -> Vec<f64> {
    let mut input = vec![0.0; 10];
    input[7] = 99.0;
    input
}

/// `len(gc.get_objects())` after a full collection.
fn tracked_objects() -> usize {
    with_interpreter(|py| {
        let gc = ModuleHandle::import(py, "gc")?;
        invoke(&gc.resolve_callable("collect")?, None)?;
        let objects = invoke(&gc.resolve_callable("get_objects")?, None)?;
        Ok(objects.len()?)
    })
    .unwrap()
}

#[test]
fn test_outlier_detection_returns_spike_index() {
    let _guard = common::serial();
    assert_eq!(call_function(MODULE, "detect", &spike_input()).unwrap(), vec![7]);
}

#[test]
fn test_empty_input_round_trips() {
    let _guard = common::serial();
    assert_eq!(call_function(MODULE, "detect", &[]).unwrap(), Vec::<i64>::new());
}

#[test]
fn test_float_results_with_call_function_as() {
    let _guard = common::serial();
    let doubled: Vec<f64> = call_function_as(MODULE, "double", &[0.5, 1.5, -2.0]).unwrap();
    assert_eq!(doubled, vec![1.0, 3.0, -4.0]);
}

#[test]
fn test_missing_function_leaves_module_usable() {
    let _guard = common::serial();
    let err = call_function(MODULE, "detect_typo", &spike_input()).unwrap_err();
    assert_eq!(
        err,
        BridgeError::AttributeNotFound {
            module: MODULE.to_string(),
            attribute: "detect_typo".to_string(),
        }
    );
    assert_eq!(call_function(MODULE, "detect", &spike_input()).unwrap(), vec![7]);
}

#[test]
fn test_missing_module() {
    let _guard = common::serial();
    let err = call_function("no_such_module_abc", "detect", &[1.0]).unwrap_err();
    assert!(matches!(err, BridgeError::ModuleNotFound { ref name, .. } if name == "no_such_module_abc"));
    assert_eq!(err.code(), -2);
}

#[test]
fn test_not_callable() {
    let _guard = common::serial();
    let err = call_function(MODULE, "not_callable", &[1.0]).unwrap_err();
    assert!(matches!(err, BridgeError::NotCallable { .. }));
}

#[test]
fn test_non_integer_result_reports_index() {
    let _guard = common::serial();
    let before = pyhost::live_owned_handles();
    let err = call_function(MODULE, "mixed", &[1.0]).unwrap_err();
    match err {
        BridgeError::Marshal(MarshalError::NotConvertible { index, ref cause, .. }) => {
            assert_eq!(index, 2);
            assert_eq!(cause.type_name, "TypeError");
        }
        ref other => panic!("expected NotConvertible, got {other:?}"),
    }
    assert_eq!(pyhost::live_owned_handles(), before);

    let err = call_function(MODULE, "halves", &[1.0, 2.0]).unwrap_err();
    assert_eq!(
        match err {
            BridgeError::Marshal(ref m) => m.index(),
            _ => None,
        },
        Some(0)
    );
}

#[test]
fn test_none_result_is_not_a_sequence() {
    let _guard = common::serial();
    let err = call_function(MODULE, "none", &[1.0]).unwrap_err();
    assert!(matches!(err, BridgeError::Marshal(MarshalError::NotASequence { .. })));
}

#[test]
fn test_short_sequence_is_detected() {
    let _guard = common::serial();
    let before = pyhost::live_owned_handles();
    let err = call_function(MODULE, "short", &[1.0]).unwrap_err();
    assert_eq!(
        err,
        BridgeError::Marshal(MarshalError::ShortSequence {
            expected: 5,
            actual: 2
        })
    );
    assert_eq!(pyhost::live_owned_handles(), before);
}

#[test]
fn test_exception_during_result_iteration() {
    let _guard = common::serial();
    let err = call_function(MODULE, "exploding", &[1.0]).unwrap_err();
    assert!(matches!(err, BridgeError::ForeignRuntime(ref e) if e.type_name == "RuntimeError"));
    // The next call sees a clean interpreter.
    assert_eq!(call_function(MODULE, "detect", &spike_input()).unwrap(), vec![7]);
}

#[test]
fn test_foreign_error_is_recoverable() {
    let _guard = common::serial();
    let err = call_function(MODULE, "boom", &[1.0, 2.0]).unwrap_err();
    assert!(matches!(err, BridgeError::ForeignRuntime(_)));
    assert!(!err.is_fatal());
    assert_eq!(call_function(MODULE, "to_ints", &[3.0]).unwrap(), vec![3]);
}

#[test]
fn test_no_handle_leak_on_success_and_failure() {
    let _guard = common::serial();
    let before = pyhost::live_owned_handles();
    call_function(MODULE, "detect", &spike_input()).unwrap();
    call_function(MODULE, "boom", &spike_input()).unwrap_err();
    call_function(MODULE, "detect_typo", &spike_input()).unwrap_err();
    call_function("no_such_module_abc", "detect", &spike_input()).unwrap_err();
    assert_eq!(pyhost::live_owned_handles(), before);
}

#[test]
fn test_repeated_calls_reach_steady_state() {
    let _guard = common::serial();
    let input = spike_input();
    let binding = FunctionBinding::bind(MODULE, "detect").unwrap();

    // Warm up caches before taking the baseline.
    for _ in 0..10 {
        binding.call(&input).unwrap();
        call_function(MODULE, "detect", &input).unwrap();
    }
    let handles_before = pyhost::live_owned_handles();
    let objects_before = tracked_objects();
    let function_refs = with_interpreter(|py| {
        let module = ModuleHandle::import(py, MODULE)?;
        Ok(module.resolve_callable("detect")?.handle().refcount())
    })
    .unwrap();

    for _ in 0..1000 {
        assert_eq!(binding.call(&input).unwrap(), vec![7]);
        assert_eq!(call_function(MODULE, "detect", &input).unwrap(), vec![7]);
    }

    assert_eq!(pyhost::live_owned_handles(), handles_before);
    let objects_after = tracked_objects();
    assert!(
        objects_after <= objects_before + 50,
        "tracked objects grew from {objects_before} to {objects_after}"
    );
    let function_refs_after = with_interpreter(|py| {
        let module = ModuleHandle::import(py, MODULE)?;
        Ok(module.resolve_callable("detect")?.handle().refcount())
    })
    .unwrap();
    assert_eq!(function_refs_after, function_refs);
}

#[test]
fn test_binding_releases_its_reference_on_drop() {
    let _guard = common::serial();
    let refcount = || {
        with_interpreter(|py| {
            let module = ModuleHandle::import(py, MODULE)?;
            Ok(module.resolve_callable("identity")?.handle().refcount())
        })
        .unwrap()
    };
    let base = refcount();
    let binding = FunctionBinding::bind(MODULE, "identity").unwrap();
    assert_eq!(binding.module(), MODULE);
    assert_eq!(binding.function(), "identity");
    assert_eq!(refcount(), base + 1);
    drop(binding);
    assert_eq!(refcount(), base);
}

#[test]
fn test_binding_is_usable_from_another_thread() {
    let _guard = common::serial();
    let binding = FunctionBinding::bind(MODULE, "detect").unwrap();
    let handle = std::thread::spawn(move || binding.call(&spike_input()));
    assert_eq!(handle.join().unwrap().unwrap(), vec![7]);
}

#[test]
fn test_printed_tracebacks_keep_counts_and_clear_state() {
    let _guard = common::serial();
    pyhost::exception::set_print_tracebacks(true);
    let before = pyhost::live_owned_handles();

    for _ in 0..3 {
        let err = call_function(MODULE, "boom", &[1.0]).unwrap_err();
        match err {
            BridgeError::ForeignRuntime(e) => {
                assert_eq!(e.type_name, "ValueError");
                assert!(e.traceback.as_deref().unwrap_or("").contains("outliers.py"));
            }
            other => panic!("expected ForeignRuntime, got {other:?}"),
        }
    }
    let pending = with_interpreter(|_py| Ok(!unsafe { pyo3::ffi::PyErr_Occurred() }.is_null())).unwrap();

    pyhost::exception::set_print_tracebacks(false);
    assert!(!pending);
    assert_eq!(pyhost::live_owned_handles(), before);
    assert_eq!(call_function(MODULE, "detect", &spike_input()).unwrap(), vec![7]);
}
