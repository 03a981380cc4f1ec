//! Full pipeline: index the repository, then analyze, generate and verify a
//! test for one target.

use serde_json::{Value, json};

use testloop::core::goal::Goal;
use testloop::core::keys;
use testloop::core::state::data_of;
use testloop::test_support::TestWorkspace;

const TARGET: &str = "src/main/kotlin/a/InvoiceService.kt";
const TEST: &str = "src/test/kotlin/a/InvoiceServiceTest.kt";
const GENERATED: &str = "class InvoiceServiceTest { @Test fun totals() {} }";

fn seed(ws: &TestWorkspace) {
    ws.write(
        TARGET,
        "package a\n\nimport a.Repo\n\nclass InvoiceService(val repo: Repo) {\n    fun total(): Int = repo.count()\n}\n",
    );
    ws.write("src/main/kotlin/a/Repo.kt", "package a\n\ninterface Repo { fun count(): Int }\n");
    ws.write(
        "src/main/kotlin/a/OrderService.kt",
        "package a\n\nclass OrderService(val repo: Repo) {\n    fun total(): Int = repo.count()\n}\n",
    );
    ws.write(
        "src/test/kotlin/a/OrderServiceTest.kt",
        "package a\n\nclass OrderServiceTest { @Test fun totalsOrders() {} }\n",
    );
}

#[test]
fn index_then_generate_produces_passing_test() {
    let ws = TestWorkspace::new();
    seed(&ws);
    ws.llm.push_reply(&format!("Here you go:\n```kotlin\n{GENERATED}\n```"));
    ws.build.push_pass("BUILD SUCCESSFUL");
    let coordinator = ws.coordinator();

    let indexed = coordinator.run_goal(&Goal::for_name("index").expect("goal"), None);
    assert!(indexed.success(), "index: {}", indexed.to_json());
    assert_eq!(indexed.get_u64(keys::INDEXED_FILES), Some(4));

    let state = coordinator.run_goal(
        &Goal::for_name("generate").expect("goal"),
        Some(data_of([(keys::TARGET_FILE, json!(TARGET))])),
    );

    assert!(state.success(), "generate: {}", state.to_json());
    assert!(state.flag(keys::ANALYSIS_COMPLETE));
    assert!(state.flag(keys::TEST_FIXED));
    assert_eq!(state.get_str(keys::TEST_FILE), Some(TEST));
    assert_eq!(state.get_str(keys::MODULE), Some("a"));
    assert_eq!(state.get_str(keys::STRATEGY), Some("create"));
    assert_eq!(state.get_artifact(keys::GENERATED_TEST), Some(&json!(GENERATED)));
    assert_eq!(ws.read(TEST), GENERATED);

    let deps = state
        .get_artifact(keys::DEPENDENCIES)
        .and_then(Value::as_array)
        .expect("dependencies");
    assert_eq!(deps[0]["symbol"], "a.Repo");
    assert_eq!(deps[0]["path"], "src/main/kotlin/a/Repo.kt");

    let prompts = ws.llm.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("### Similar Tested Files"));
    assert!(prompts[0].contains("OrderServiceTest"));
    assert!(prompts[0].contains("a.Repo"));

    let builds = ws.build.calls();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].test_file, TEST);
}

#[test]
fn generation_failure_aborts_before_fixing() {
    let ws = TestWorkspace::new();
    seed(&ws);
    // No replies scripted: every LLM call fails with a service error.
    let state = ws.coordinator().run_goal(
        &Goal::for_name("generate").expect("goal"),
        Some(data_of([(keys::TARGET_FILE, json!(TARGET))])),
    );

    assert!(!state.success());
    assert!(
        state
            .get_str(keys::ERROR)
            .is_some_and(|e| e.starts_with("generate test:"))
    );
    assert!(ws.build.calls().is_empty());
    assert!(!ws.root().join(TEST).exists());
}
