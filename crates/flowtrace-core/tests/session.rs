//! End-to-end engine tests against the scripted mock VM.

use flowtrace_core::{ControlFlowEvent, DebugSession, InstrumentationScope, SessionError};
use flowtrace_jdwp::mock::{
    MockClass, MockEventRequest, MockMethod, MockObject, MockObjectKind, MockProgram, MockStop,
    MockToString, MockVm,
};
use flowtrace_jdwp::types::{
    EventSet, JdwpValue, LineTable, LineTableEntry, Location, VariableInfo,
    EVENT_KIND_CLASS_PREPARE, EVENT_KIND_METHOD_ENTRY, EVENT_KIND_METHOD_EXIT_WITH_RETURN_VALUE,
    EVENT_KIND_SINGLE_STEP, SUSPEND_POLICY_ALL, TAG_ARRAY, TAG_OBJECT,
};
use flowtrace_jdwp::{EventModifier, FrameInfo, JdwpClient, JdwpEvent};

const THREAD: u64 = 0x1001;

const MAIN_CLASS: u64 = 0x3001;
const LIB_CLASS: u64 = 0x3002;
const POINT_CLASS: u64 = 0x3003;
const BROKEN_CLASS: u64 = 0x3004;
const RAW_CLASS: u64 = 0x3005;
const NESTED_CLASS: u64 = 0x3006;

const M_MAIN: u64 = 0x4001;
const M_HELPER: u64 = 0x4002;
const M_OUTER: u64 = 0x4003;
const M_INNER: u64 = 0x4004;
const M_LIB_RUN: u64 = 0x4005;
const POINT_TO_STRING: u64 = 0x4006;
const BROKEN_TO_STRING: u64 = 0x4007;
const M_RAW_RUN: u64 = 0x4008;
const M_NESTED_RUN: u64 = 0x4009;
const M_SYNTH: u64 = 0x400a;

const POINT_OBJECT: u64 = 0x5001;
const BROKEN_OBJECT: u64 = 0x5002;
const EXCEPTION_OBJECT: u64 = 0x5003;
const ARRAY_OBJECT: u64 = 0x5004;

fn loc(class_id: u64, method_id: u64, index: u64) -> Location {
    Location {
        type_tag: 1,
        class_id,
        method_id,
        index,
    }
}

fn frame(frame_id: u64, location: Location) -> FrameInfo {
    FrameInfo { frame_id, location }
}

fn int_var(name: &str, slot: u32) -> VariableInfo {
    VariableInfo {
        code_index: 0,
        name: name.to_string(),
        signature: "I".to_string(),
        length: 100,
        slot,
    }
}

fn object_var(name: &str, signature: &str, slot: u32) -> VariableInfo {
    VariableInfo {
        code_index: 0,
        name: name.to_string(),
        signature: signature.to_string(),
        length: 100,
        slot,
    }
}

fn method(method_id: u64, name: &str, signature: &str, lines: &[(u64, i32)]) -> MockMethod {
    method_with_vars(method_id, name, signature, lines, 0, Vec::new())
}

fn method_with_vars(
    method_id: u64,
    name: &str,
    signature: &str,
    lines: &[(u64, i32)],
    arg_slots: u32,
    variables: Vec<VariableInfo>,
) -> MockMethod {
    MockMethod {
        method_id,
        name: name.to_string(),
        signature: signature.to_string(),
        mod_bits: 0,
        line_table: LineTable {
            start: 0,
            end: 20,
            lines: lines
                .iter()
                .map(|&(code_index, line)| LineTableEntry { code_index, line })
                .collect(),
        },
        arg_slots,
        variables,
    }
}

fn all_suspended(events: Vec<JdwpEvent>) -> EventSet {
    EventSet {
        suspend_policy: SUSPEND_POLICY_ALL,
        events,
    }
}

fn vm_start_stop() -> MockStop {
    MockStop {
        set: all_suspended(vec![JdwpEvent::VmStart {
            request_id: 0,
            thread: THREAD,
        }]),
        ..Default::default()
    }
}

fn class_prepare_stop(type_id: u64, signature: &str) -> MockStop {
    MockStop {
        set: all_suspended(vec![JdwpEvent::ClassPrepare {
            request_id: 1,
            thread: THREAD,
            ref_type_tag: 1,
            type_id,
            signature: signature.to_string(),
            status: 7,
        }]),
        ..Default::default()
    }
}

fn step_stop(location: Location, frame_id: u64, values: Vec<(u32, JdwpValue)>) -> MockStop {
    MockStop {
        set: all_suspended(vec![JdwpEvent::SingleStep {
            request_id: 2,
            thread: THREAD,
            location,
        }]),
        frames: vec![frame(frame_id, location)],
        frame_values: values
            .into_iter()
            .map(|(slot, value)| (frame_id, slot, value))
            .collect(),
    }
}

fn entry_stop(location: Location, frame_id: u64, values: Vec<(u32, JdwpValue)>) -> MockStop {
    MockStop {
        set: all_suspended(vec![JdwpEvent::MethodEntry {
            request_id: 3,
            thread: THREAD,
            location,
        }]),
        frames: vec![frame(frame_id, location)],
        frame_values: values
            .into_iter()
            .map(|(slot, value)| (frame_id, slot, value))
            .collect(),
    }
}

fn exit_stop(location: Location, return_value: JdwpValue) -> MockStop {
    MockStop {
        set: all_suspended(vec![JdwpEvent::MethodExit {
            request_id: 4,
            thread: THREAD,
            location,
            return_value: Some(return_value),
        }]),
        ..Default::default()
    }
}

fn main_class(extra_methods: Vec<MockMethod>) -> MockClass {
    let mut methods = vec![
        method(M_MAIN, "main", "([Ljava/lang/String;)V", &[(0, 2), (5, 3), (10, 4)]),
        method_with_vars(
            M_HELPER,
            "helper",
            "(I)I",
            &[(0, 7), (4, 8)],
            1,
            vec![int_var("x", 0)],
        ),
    ];
    methods.extend(extra_methods);
    MockClass {
        type_id: MAIN_CLASS,
        signature: "LMain;".to_string(),
        source_file: Some("Main.java".to_string()),
        superclass: 0,
        methods,
    }
}

fn main_scope() -> InstrumentationScope {
    let mut scope = InstrumentationScope::new();
    scope.add_type("Main", "Main.java");
    scope
}

async fn run_session(program: MockProgram, scope: InstrumentationScope) -> flowtrace_core::Trace {
    let vm = MockVm::spawn(program).await.unwrap();
    let (client, events) = JdwpClient::connect(vm.addr()).await.unwrap();
    let session = DebugSession::attach(client, events, scope).await.unwrap();
    session.run().await.unwrap()
}

/// ClassMatch patterns of the method entry subscriptions currently set.
async fn method_entry_patterns(vm: &MockVm) -> Vec<String> {
    vm.event_requests()
        .await
        .into_iter()
        .filter(|r| r.event_kind == EVENT_KIND_METHOD_ENTRY)
        .flat_map(|r| r.modifiers)
        .filter_map(|m| match m {
            EventModifier::ClassMatch { pattern } => Some(pattern),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn scenario_main_calls_helper() {
    let program = MockProgram {
        classes: vec![main_class(Vec::new())],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(MAIN_CLASS, "LMain;"),
            step_stop(loc(MAIN_CLASS, M_MAIN, 5), 0x2001, vec![]),
            entry_stop(
                loc(MAIN_CLASS, M_HELPER, 0),
                0x2002,
                vec![(0, JdwpValue::Int(5))],
            ),
            step_stop(
                loc(MAIN_CLASS, M_HELPER, 4),
                0x2003,
                vec![(0, JdwpValue::Int(5))],
            ),
            exit_stop(loc(MAIN_CLASS, M_HELPER, 6), JdwpValue::Int(10)),
            step_stop(loc(MAIN_CLASS, M_MAIN, 10), 0x2004, vec![]),
        ],
        ..Default::default()
    };

    let trace = run_session(program, main_scope()).await;
    let events = trace.events();
    assert_eq!(events.len(), 5, "unexpected trace: {events:#?}");

    let call_uid = match &events[1] {
        ControlFlowEvent::FunCall {
            uid,
            parent: None,
            fun_id,
            args: Some(args),
        } => {
            assert_eq!(fun_id, "helper");
            assert_eq!(args, &[("x".to_string(), Some("5".to_string()))]);
            *uid
        }
        other => panic!("expected FunCall, got {other}"),
    };

    match &events[0] {
        ControlFlowEvent::LineVisited {
            parent: None, line, ..
        } => {
            assert_eq!(line.filename, "Main.java");
            assert_eq!(line.line, 3);
        }
        other => panic!("expected LineVisited, got {other}"),
    }

    match &events[2] {
        ControlFlowEvent::LineVisited {
            parent,
            line,
            visible_vars: Some(vars),
            ..
        } => {
            assert_eq!(*parent, Some(call_uid), "inside-helper line attributed to call");
            assert_eq!(line.line, 8);
            assert_eq!(vars.get("x"), Some(&Some("5".to_string())));
        }
        other => panic!("expected LineVisited, got {other}"),
    }

    match &events[3] {
        ControlFlowEvent::FunExit {
            parent: None,
            fun_id,
            ret_val,
            ..
        } => {
            assert_eq!(fun_id, "helper");
            assert_eq!(ret_val.as_deref(), Some("10"));
        }
        other => panic!("expected FunExit, got {other}"),
    }

    match &events[4] {
        ControlFlowEvent::LineVisited {
            parent: None, line, ..
        } => assert_eq!(line.line, 4),
        other => panic!("expected LineVisited, got {other}"),
    }

    // uids are strictly increasing in append order
    let uids: Vec<_> = events.iter().map(ControlFlowEvent::uid).collect();
    assert!(uids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn nested_calls_pair_up_and_attribute_parents() {
    let outer = method(M_OUTER, "outer", "()V", &[(0, 10)]);
    let inner = method_with_vars(
        M_INNER,
        "inner",
        "(I)I",
        &[(0, 20)],
        1,
        vec![int_var("n", 0)],
    );
    let program = MockProgram {
        classes: vec![main_class(vec![outer, inner])],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(MAIN_CLASS, "LMain;"),
            entry_stop(loc(MAIN_CLASS, M_OUTER, 0), 0x2001, vec![]),
            entry_stop(
                loc(MAIN_CLASS, M_INNER, 0),
                0x2002,
                vec![(0, JdwpValue::Int(7))],
            ),
            exit_stop(loc(MAIN_CLASS, M_INNER, 2), JdwpValue::Int(14)),
            exit_stop(loc(MAIN_CLASS, M_OUTER, 2), JdwpValue::Void),
        ],
        ..Default::default()
    };

    let trace = run_session(program, main_scope()).await;
    let events = trace.events();
    assert_eq!(events.len(), 4, "unexpected trace: {events:#?}");

    let outer_uid = events[0].uid();
    match &events[0] {
        ControlFlowEvent::FunCall {
            parent: None,
            fun_id,
            args: Some(args),
            ..
        } => {
            assert_eq!(fun_id, "outer");
            assert!(args.is_empty(), "parameterless call records empty args");
        }
        other => panic!("expected FunCall, got {other}"),
    }

    match &events[1] {
        ControlFlowEvent::FunCall { parent, fun_id, .. } => {
            assert_eq!(fun_id, "inner");
            assert_eq!(*parent, Some(outer_uid));
        }
        other => panic!("expected FunCall, got {other}"),
    }

    match &events[2] {
        ControlFlowEvent::FunExit { parent, fun_id, ret_val, .. } => {
            assert_eq!(fun_id, "inner");
            // exits are attributed to the caller of the returning function
            assert_eq!(*parent, Some(outer_uid));
            assert_eq!(ret_val.as_deref(), Some("14"));
        }
        other => panic!("expected FunExit, got {other}"),
    }

    match &events[3] {
        ControlFlowEvent::FunExit { parent: None, fun_id, ret_val, .. } => {
            assert_eq!(fun_id, "outer");
            assert_eq!(ret_val.as_deref(), Some("<void>"));
        }
        other => panic!("expected FunExit, got {other}"),
    }

    let calls = events
        .iter()
        .filter(|e| matches!(e, ControlFlowEvent::FunCall { .. }))
        .count();
    let exits = events
        .iter()
        .filter(|e| matches!(e, ControlFlowEvent::FunExit { .. }))
        .count();
    assert_eq!(calls, exits);
}

#[tokio::test]
async fn out_of_scope_stops_are_skipped() {
    let lib = MockClass {
        type_id: LIB_CLASS,
        signature: "LLib;".to_string(),
        source_file: Some("Lib.java".to_string()),
        superclass: 0,
        methods: vec![method(M_LIB_RUN, "run", "()V", &[(0, 5)])],
    };
    let program = MockProgram {
        classes: vec![main_class(Vec::new()), lib],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(MAIN_CLASS, "LMain;"),
            class_prepare_stop(LIB_CLASS, "LLib;"),
            step_stop(loc(LIB_CLASS, M_LIB_RUN, 0), 0x2001, vec![]),
            step_stop(loc(MAIN_CLASS, M_MAIN, 5), 0x2002, vec![]),
        ],
        ..Default::default()
    };

    let vm = MockVm::spawn(program).await.unwrap();
    let (client, events) = JdwpClient::connect(vm.addr()).await.unwrap();
    let session = DebugSession::attach(client, events, main_scope())
        .await
        .unwrap();
    let trace = session.run().await.unwrap();

    let lines: Vec<_> = trace
        .events()
        .iter()
        .filter_map(|e| match e {
            ControlFlowEvent::LineVisited { line, .. } => Some(line.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(lines.len(), 1, "only the in-scope stop is recorded");
    assert_eq!(lines[0].filename, "Main.java");

    // The out-of-scope type never got method entry/exit subscriptions.
    let entry_patterns: Vec<_> = vm
        .event_requests()
        .await
        .into_iter()
        .filter(|r| r.event_kind == EVENT_KIND_METHOD_ENTRY)
        .collect();
    assert_eq!(entry_patterns.len(), 1);
}

#[tokio::test]
async fn object_identity_is_stable_across_renders() {
    let point = MockClass {
        type_id: POINT_CLASS,
        signature: "LPoint;".to_string(),
        source_file: Some("Point.java".to_string()),
        superclass: 0,
        methods: vec![method(
            POINT_TO_STRING,
            "toString",
            "()Ljava/lang/String;",
            &[(0, 1)],
        )],
    };
    let mut main = main_class(Vec::new());
    main.methods[0].variables = vec![object_var("p", "LPoint;", 1)];
    main.methods[0].arg_slots = 1;

    let p = (1, JdwpValue::Object { tag: TAG_OBJECT, id: POINT_OBJECT });
    let program = MockProgram {
        classes: vec![main, point],
        objects: vec![MockObject {
            object_id: POINT_OBJECT,
            kind: MockObjectKind::Instance {
                class_id: POINT_CLASS,
                // The object mutates between the two stops.
                to_string: MockToString::Sequence(vec![
                    "Point(1, 2)".to_string(),
                    "Point(9, 9)".to_string(),
                ]),
            },
        }],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(MAIN_CLASS, "LMain;"),
            step_stop(loc(MAIN_CLASS, M_MAIN, 5), 0x2001, vec![p.clone()]),
            step_stop(loc(MAIN_CLASS, M_MAIN, 10), 0x2002, vec![p]),
        ],
        ..Default::default()
    };

    let trace = run_session(program, main_scope()).await;
    let rendered: Vec<String> = trace
        .events()
        .iter()
        .filter_map(|e| match e {
            ControlFlowEvent::LineVisited {
                visible_vars: Some(vars),
                ..
            } => vars.get("p").cloned().flatten(),
            _ => None,
        })
        .collect();
    assert_eq!(rendered.len(), 2);
    assert_eq!(rendered[0], "Point@1: Point(1, 2)");
    assert_eq!(
        rendered[1],
        "Point@1: Point(9, 9)",
        "identity prefix survives a changed textual value"
    );
}

#[tokio::test]
async fn throwing_to_string_degrades_value_and_restores_requests() {
    let broken = MockClass {
        type_id: BROKEN_CLASS,
        signature: "LBroken;".to_string(),
        source_file: Some("Broken.java".to_string()),
        superclass: 0,
        methods: vec![method(
            BROKEN_TO_STRING,
            "toString",
            "()Ljava/lang/String;",
            &[(0, 1)],
        )],
    };
    let mut main = main_class(Vec::new());
    main.methods[0].variables = vec![object_var("b", "LBroken;", 1)];
    main.methods[0].arg_slots = 1;

    let b = (1, JdwpValue::Object { tag: TAG_OBJECT, id: BROKEN_OBJECT });
    let program = MockProgram {
        classes: vec![main, broken],
        objects: vec![MockObject {
            object_id: BROKEN_OBJECT,
            kind: MockObjectKind::Instance {
                class_id: BROKEN_CLASS,
                to_string: MockToString::Throw(EXCEPTION_OBJECT),
            },
        }],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(MAIN_CLASS, "LMain;"),
            step_stop(loc(MAIN_CLASS, M_MAIN, 5), 0x2001, vec![b]),
            // the session must keep going after the failed invocation
            step_stop(loc(MAIN_CLASS, M_MAIN, 10), 0x2002, vec![]),
        ],
        ..Default::default()
    };

    let vm = MockVm::spawn(program).await.unwrap();
    let (client, events) = JdwpClient::connect(vm.addr()).await.unwrap();
    let session = DebugSession::attach(client, events, main_scope())
        .await
        .unwrap();
    let trace = session.run().await.unwrap();

    let visits: Vec<_> = trace
        .events()
        .iter()
        .filter_map(|e| match e {
            ControlFlowEvent::LineVisited { line, visible_vars, .. } => {
                Some((line.line, visible_vars.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(visits.len(), 2);
    assert_eq!(
        visits[0].1.as_ref().and_then(|vars| vars.get("b").cloned()),
        Some(None),
        "failed render degrades to absent, not an error"
    );

    // The pause/restore bracket left the request set exactly re-armed:
    // one class-prepare, one entry, one exit, one step, no duplicates.
    let requests = vm.event_requests().await;
    let count = |kind: u8| -> usize {
        requests
            .iter()
            .filter(|r: &&MockEventRequest| r.event_kind == kind)
            .count()
    };
    assert_eq!(count(EVENT_KIND_CLASS_PREPARE), 1);
    assert_eq!(count(EVENT_KIND_METHOD_ENTRY), 1);
    assert_eq!(count(EVENT_KIND_METHOD_EXIT_WITH_RETURN_VALUE), 1);
    assert_eq!(count(EVENT_KIND_SINGLE_STEP), 1);
}

#[tokio::test]
async fn arrays_render_in_element_order() {
    let mut main = main_class(Vec::new());
    main.methods[0].variables = vec![object_var("arr", "[I", 1)];
    main.methods[0].arg_slots = 1;

    let arr = (1, JdwpValue::Object { tag: TAG_ARRAY, id: ARRAY_OBJECT });
    let program = MockProgram {
        classes: vec![main],
        objects: vec![MockObject {
            object_id: ARRAY_OBJECT,
            kind: MockObjectKind::Array {
                element_tag: b'I',
                values: vec![JdwpValue::Int(3), JdwpValue::Int(1), JdwpValue::Int(2)],
            },
        }],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(MAIN_CLASS, "LMain;"),
            step_stop(loc(MAIN_CLASS, M_MAIN, 5), 0x2001, vec![arr]),
        ],
        ..Default::default()
    };

    let trace = run_session(program, main_scope()).await;
    let rendered = trace
        .events()
        .iter()
        .find_map(|e| match e {
            ControlFlowEvent::LineVisited {
                visible_vars: Some(vars),
                ..
            } => vars.get("arr").cloned().flatten(),
            _ => None,
        })
        .expect("array variable rendered");
    assert_eq!(rendered, "[3,1,2]");
}

#[tokio::test]
async fn exit_without_entry_is_a_fatal_invariant_violation() {
    let program = MockProgram {
        classes: vec![main_class(Vec::new())],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(MAIN_CLASS, "LMain;"),
            exit_stop(loc(MAIN_CLASS, M_HELPER, 6), JdwpValue::Int(10)),
        ],
        ..Default::default()
    };

    let vm = MockVm::spawn(program).await.unwrap();
    let (client, events) = JdwpClient::connect(vm.addr()).await.unwrap();
    let session = DebugSession::attach(client, events, main_scope())
        .await
        .unwrap();
    let err = session.run().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::UnmatchedReturn { fun_id } if fun_id == "helper"
    ));
}

#[tokio::test]
async fn class_without_debug_metadata_is_not_instrumented() {
    let raw = MockClass {
        type_id: RAW_CLASS,
        signature: "LRaw;".to_string(),
        source_file: None,
        superclass: 0,
        methods: vec![method(M_RAW_RUN, "run", "()V", &[(0, 3)])],
    };
    let mut scope = main_scope();
    scope.add_type("Raw", "Raw.java");
    let program = MockProgram {
        classes: vec![main_class(Vec::new()), raw],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(RAW_CLASS, "LRaw;"),
            class_prepare_stop(MAIN_CLASS, "LMain;"),
            step_stop(loc(MAIN_CLASS, M_MAIN, 5), 0x2001, vec![]),
        ],
        ..Default::default()
    };

    let vm = MockVm::spawn(program).await.unwrap();
    let (client, events) = JdwpClient::connect(vm.addr()).await.unwrap();
    let session = DebugSession::attach(client, events, scope).await.unwrap();
    let trace = session.run().await.unwrap();

    // Only the type with debug metadata got method subscriptions, and the
    // session kept going past the skipped one.
    assert_eq!(method_entry_patterns(&vm).await, ["Main"]);
    assert!(trace.events().iter().any(|e| matches!(
        e,
        ControlFlowEvent::LineVisited { line, .. } if line.line == 3
    )));
}

#[tokio::test]
async fn stops_without_line_mapping_are_skipped() {
    // A synthetic method has a line table with no entries.
    let synthetic = method(M_SYNTH, "lambda$main$0", "()V", &[]);
    let program = MockProgram {
        classes: vec![main_class(vec![synthetic])],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(MAIN_CLASS, "LMain;"),
            step_stop(loc(MAIN_CLASS, M_SYNTH, 0), 0x2001, vec![]),
            step_stop(loc(MAIN_CLASS, M_MAIN, 5), 0x2002, vec![]),
        ],
        ..Default::default()
    };

    let trace = run_session(program, main_scope()).await;
    let lines: Vec<i32> = trace
        .events()
        .iter()
        .filter_map(|e| match e {
            ControlFlowEvent::LineVisited { line, .. } => Some(line.line),
            _ => None,
        })
        .collect();
    assert_eq!(lines, [3], "the stop without a line mapping is skipped");
}

#[tokio::test]
async fn transient_method_lookup_failures_are_not_cached() {
    let program = MockProgram {
        classes: vec![main_class(Vec::new())],
        fail_once: vec![(2, 5)],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(MAIN_CLASS, "LMain;"),
            entry_stop(
                loc(MAIN_CLASS, M_HELPER, 0),
                0x2001,
                vec![(0, JdwpValue::Int(5))],
            ),
            entry_stop(
                loc(MAIN_CLASS, M_HELPER, 0),
                0x2002,
                vec![(0, JdwpValue::Int(6))],
            ),
            exit_stop(loc(MAIN_CLASS, M_HELPER, 6), JdwpValue::Int(12)),
        ],
        ..Default::default()
    };

    let trace = run_session(program, main_scope()).await;
    let events = trace.events();
    // The first entry hits the failed method lookup and is dropped; the
    // second entry retries instead of seeing a cached empty list.
    assert_eq!(events.len(), 2, "unexpected trace: {events:#?}");
    match &events[0] {
        ControlFlowEvent::FunCall {
            fun_id,
            args: Some(args),
            ..
        } => {
            assert_eq!(fun_id, "helper");
            assert_eq!(args, &[("x".to_string(), Some("6".to_string()))]);
        }
        other => panic!("expected FunCall, got {other}"),
    }
    match &events[1] {
        ControlFlowEvent::FunExit { fun_id, ret_val, .. } => {
            assert_eq!(fun_id, "helper");
            assert_eq!(ret_val.as_deref(), Some("12"));
        }
        other => panic!("expected FunExit, got {other}"),
    }
}

#[tokio::test]
async fn nested_classes_are_instrumented_by_declared_name() {
    let nested = MockClass {
        type_id: NESTED_CLASS,
        signature: "LMain$Inner;".to_string(),
        source_file: Some("Main.java".to_string()),
        superclass: 0,
        methods: vec![method(M_NESTED_RUN, "run", "()V", &[(0, 12)])],
    };
    // The source scan records `Inner`, the VM loads `Main$Inner`.
    let mut scope = main_scope();
    scope.add_type("Inner", "Main.java");
    let program = MockProgram {
        classes: vec![main_class(Vec::new()), nested],
        script: vec![
            vm_start_stop(),
            class_prepare_stop(NESTED_CLASS, "LMain$Inner;"),
            entry_stop(loc(NESTED_CLASS, M_NESTED_RUN, 0), 0x2001, vec![]),
            exit_stop(loc(NESTED_CLASS, M_NESTED_RUN, 2), JdwpValue::Void),
        ],
        ..Default::default()
    };

    let vm = MockVm::spawn(program).await.unwrap();
    let (client, events) = JdwpClient::connect(vm.addr()).await.unwrap();
    let session = DebugSession::attach(client, events, scope).await.unwrap();
    let trace = session.run().await.unwrap();

    // The subscription uses the binary name the VM knows the class by.
    assert_eq!(method_entry_patterns(&vm).await, ["Main$Inner"]);
    assert!(trace.events().iter().any(|e| matches!(
        e,
        ControlFlowEvent::FunCall { fun_id, .. } if fun_id == "run"
    )));
}
