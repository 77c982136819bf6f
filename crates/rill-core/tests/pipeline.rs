//! End-to-end tests: configured snippet in, running stage out.

use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};

use rill_core::compile::{CompileTask, CompilerConfig, Location, RuntimeCompiler, Toolchain};
use rill_core::lang::MAX_CALL_DEPTH;
use rill_core::{
    Error, FileKind, HostLoader, SnippetPipeline, TransformerConfig, Value, WRAPPER_UNIT,
};

fn pipeline() -> SnippetPipeline {
    SnippetPipeline::new(CompilerConfig::default())
}

fn ints(range: std::ops::RangeInclusive<i64>, step: i64) -> Vec<Value> {
    range.map(|i| Value::Int(i * step)).collect()
}

#[test]
fn test_buffered_stage_keeps_every_fifth_value() {
    let stage = pipeline()
        .build("return |input| input.buffer(5).map(|list| list.get(4));")
        .expect("snippet should build");

    assert_eq!(stage.process(ints(1..=5, 100)).unwrap(), vec![Value::Int(500)]);
    assert_eq!(
        stage.process(ints(1..=10, 100)).unwrap(),
        vec![Value::Int(500), Value::Int(1000)]
    );
}

#[test]
fn test_quoted_multiline_snippet_sums_parsed_strings() {
    let raw = "\"|input| input.map(|s| s.to_string().parse_int()).buffer(3).map(|is| {\\n\
               let mut sum = 0;\\n\
               for i in is { sum += i; }\\n\
               sum\\n\
               })\"";
    let stage = pipeline().try_build(raw).unwrap();
    let input = ["100", "200", "300", "400", "500", "600"]
        .into_iter()
        .map(Value::from)
        .collect();
    assert_eq!(
        stage.process(input).unwrap(),
        vec![Value::Int(600), Value::Int(1500)]
    );
}

#[test]
fn test_nested_function_in_snippet() {
    let raw = "fn scale(v: Value) -> Value { v * 4 }\n|input| input.map(|v| scale(v))";
    let stage = pipeline().try_build(raw).unwrap();
    assert_eq!(
        stage.process(vec![Value::Int(1), Value::Float(0.5)]).unwrap(),
        vec![Value::Int(4), Value::Float(2.0)]
    );

    let result = pipeline().compile(raw);
    let names: Vec<_> = result.units.iter().map(|u| u.name.clone()).collect();
    assert_eq!(names, vec![WRAPPER_UNIT.to_string(), format!("{WRAPPER_UNIT}$scale")]);
}

#[test]
fn test_snippet_calls_library_on_classpath() {
    let lib = RuntimeCompiler::new(CompilerConfig::default())
        .compile("lib.Math", "pub fn square(x: i64) -> i64 { x * x }");
    assert!(lib.was_successful(), "{lib}");

    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("lib")).unwrap();
    fs::write(dir.path().join("lib/Math.unit"), &lib.units[0].bytes).unwrap();

    let config = TransformerConfig {
        code: "use lib::Math;\n|input| input.map(|v| Math::square(v))".to_string(),
        classpath: Some(dir.path().to_string_lossy().into_owned()),
        ..TransformerConfig::default()
    };
    let pipeline = SnippetPipeline::from_config(&config);
    let stage = pipeline.try_build(&config.code).unwrap();
    assert_eq!(
        stage.process(ints(1..=3, 1)).unwrap(),
        vec![Value::Int(1), Value::Int(4), Value::Int(9)]
    );

    // without the library on the classpath the import does not resolve
    let err = SnippetPipeline::new(CompilerConfig::default())
        .try_build(&config.code)
        .err()
        .unwrap();
    match err {
        Error::Compilation { unit, message } => {
            assert_eq!(unit, WRAPPER_UNIT);
            assert!(message.contains("ERROR:unresolved import `lib::Math`"));
        }
        other => panic!("expected compilation error, got {other:?}"),
    }
}

#[test]
fn test_concurrent_builds_are_isolated() {
    let pipeline = pipeline();
    let outputs: Vec<Vec<Value>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (1..=4)
            .map(|factor| {
                let pipeline = pipeline.clone();
                scope.spawn(move || {
                    let raw = format!("|input| input.map(|v| v * {factor})");
                    let stage = pipeline.build(&raw).unwrap();
                    stage.process(vec![Value::Int(10)]).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(
        outputs,
        vec![
            vec![Value::Int(10)],
            vec![Value::Int(20)],
            vec![Value::Int(30)],
            vec![Value::Int(40)],
        ]
    );
}

#[test]
fn test_compile_error_yields_no_stage() {
    let raw = "|input| input.map(|v| v.frobnicate())";
    assert!(pipeline().build(raw).is_none());

    let err = pipeline().try_build(raw).err().unwrap();
    let Error::Compilation { message, .. } = err else {
        panic!("expected compilation error");
    };
    assert!(message.starts_with("==========\n"));
    assert!(message.contains("ERROR:no method named `frobnicate` found for type `Value`"));
}

/// Log sink shared with a test subscriber.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_compile_failure_logs_each_message() {
    let raw = "|input| input.map(|v| v.nope()).map(|v| v.nada())";
    let messages = pipeline().compile(raw).messages.len();
    assert_eq!(messages, 2);

    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .without_time()
        .finish();
    let stage = tracing::subscriber::with_default(subscriber, || pipeline().build(raw));
    assert!(stage.is_none());

    let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert_eq!(logs.matches("ERROR rill_core::pipeline: ").count(), 1 + messages);
    assert!(logs.contains("ERROR rill_core::pipeline: Compilation failed\n"));
    assert!(logs.contains("ERROR:no method named `nope` found for type `Value`"));
    assert!(logs.contains("ERROR:no method named `nada` found for type `Value`"));
}

/// Succeeds, but only ever writes one helper unit.
struct HelperOnly {
    bytes: Vec<u8>,
}

impl Toolchain for HelperOnly {
    fn name(&self) -> &str {
        "helper-only"
    }

    fn compile(&self, task: CompileTask<'_>) -> bool {
        let Ok(unit) = task.file_manager.get_unit_for_output(
            Location::ClassOutput,
            "rill.transform.Helper",
            FileKind::Binary,
            None,
        ) else {
            return false;
        };
        unit.open_write().write_all(&self.bytes).is_ok()
    }
}

#[test]
fn test_missing_wrapper_unit_yields_no_stage() {
    let helper = RuntimeCompiler::new(CompilerConfig::default())
        .compile("rill.transform.Helper", "pub fn one() -> i64 { 1 }");
    assert!(helper.was_successful(), "{helper}");

    let toolchain = Arc::new(HelperOnly {
        bytes: helper.units[0].bytes.clone(),
    });
    let pipeline = SnippetPipeline::with_parts(
        RuntimeCompiler::with_toolchain(CompilerConfig::default(), toolchain),
        Arc::new(HostLoader::empty()),
    );

    let result = pipeline.compile("|input| input");
    assert!(result.was_successful());
    assert!(result.unit(WRAPPER_UNIT).is_none());

    let err = pipeline.try_build("|input| input").err().unwrap();
    assert!(matches!(err, Error::UnitNotFound(ref name) if name == WRAPPER_UNIT));
    assert!(pipeline.build("|input| input").is_none());
}

#[test]
fn test_faulting_factory_yields_no_stage() {
    let raw = "let _z = 1 / 0;\n|input| input";
    assert!(pipeline().build(raw).is_none());

    let err = pipeline().try_build(raw).err().unwrap();
    assert!(matches!(err, Error::Runtime(_)));
    assert!(err.to_string().contains("attempt to divide by zero"));
}

#[test]
fn test_runtime_fault_surfaces_from_process() {
    let stage = pipeline().try_build("|input| input.buffer(0)").unwrap();
    let err = stage.process(ints(1..=3, 1)).unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
    assert!(err.to_string().contains("buffer size must be positive, got 0"));
}

#[test]
fn test_deep_recursion_faults_at_depth_limit() {
    let raw = "fn down(n: i64) -> i64 { if n == 0 { 0 } else { down(n - 1) + 1 } }\n\
               |input| input.map(|v| down(v))";
    let stage = pipeline().try_build(raw).unwrap();

    let deepest = MAX_CALL_DEPTH as i64 - 1;
    assert_eq!(
        stage.process(vec![Value::Int(deepest)]).unwrap(),
        vec![Value::Int(deepest)]
    );

    let err = stage.process(vec![Value::Int(deepest + 1)]).unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
    assert!(err.to_string().contains(&format!("call depth exceeded {MAX_CALL_DEPTH}")));
}

#[test]
fn test_identity_and_empty_input() {
    let stage = pipeline().try_build("|input| input").unwrap();
    assert!(stage.process(Vec::new()).unwrap().is_empty());
    assert_eq!(
        stage.process(vec![Value::from("a"), Value::Null]).unwrap(),
        vec![Value::from("a"), Value::Null]
    );
}
