//! End-to-end tests for the provisor binary
//!
//! Hosts use the local connection, so the run executes real commands on
//! the test machine inside a temporary directory.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const LOCAL_INVENTORY: &str = r#"
all:
  hosts:
    localhost:
      connection: local
"#;

const WEB_INVENTORY: &str = r#"
all:
  children:
    webservers:
      hosts:
        web1: { address: 10.0.0.11 }
        web2: { address: 10.0.0.12 }
    dbservers:
      hosts:
        db1: { address: 10.0.0.21 }
"#;

fn provisor() -> Command {
    let mut cmd = Command::cargo_bin("provisor").unwrap();
    cmd.arg("--no-color")
        .env_remove("PROVISOR_INVENTORY")
        .env_remove("PROVISOR_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_help_lists_subcommands() {
    provisor()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list-hosts"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_version() {
    provisor()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_validate_ok() {
    let dir = TempDir::new().unwrap();
    let playbook = write(
        &dir,
        "site.yml",
        r#"
- hosts: all
  tasks:
    - name: hello
      debug: hello
    - name: uptime
      shell: uptime
"#,
    );

    provisor()
        .arg("validate")
        .arg(&playbook)
        .assert()
        .success()
        .stdout(predicate::str::contains("OK (1 plays, 2 tasks)"));
}

#[test]
fn test_validate_rejects_forward_reference() {
    let dir = TempDir::new().unwrap();
    let playbook = write(
        &dir,
        "site.yml",
        r#"
- hosts: all
  tasks:
    - name: use
      debug: early
      when: later.rc == 0
    - name: produce
      shell: "true"
      register: later
"#,
    );

    provisor()
        .arg("validate")
        .arg(&playbook)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("produced by a later task"));
}

#[test]
fn test_list_hosts_with_pattern_and_limit() {
    let dir = TempDir::new().unwrap();
    let inventory = write(&dir, "hosts.yml", WEB_INVENTORY);

    provisor()
        .arg("-i")
        .arg(&inventory)
        .arg("list-hosts")
        .arg("webservers")
        .assert()
        .success()
        .stdout(predicate::str::contains("hosts (2)"))
        .stdout(predicate::str::contains("web1 (10.0.0.11)"))
        .stdout(predicate::str::contains("db1").not());

    provisor()
        .arg("-i")
        .arg(&inventory)
        .args(["--limit", "db*", "list-hosts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hosts (1)"))
        .stdout(predicate::str::contains("db1"));
}

#[test]
fn test_run_local_playbook_writes_report() {
    let dir = TempDir::new().unwrap();
    let inventory = write(&dir, "hosts.yml", LOCAL_INVENTORY);
    write(
        &dir,
        "templates/summary.txt.j2",
        "host={{ inventory_hostname }} greeting={{ greeting.stdout }}\n",
    );
    let playbook = write(
        &dir,
        "site.yml",
        r#"
- name: local
  hosts: all
  gather_facts: false
  tasks:
    - name: greet
      shell: echo hello
      register: greeting
    - name: summary
      report:
        template: templates/summary.txt.j2
        kind: summary
"#,
    );
    let reports = dir.path().join("out");

    provisor()
        .arg("-i")
        .arg(&inventory)
        .arg("run")
        .arg(&playbook)
        .arg("--reports-dir")
        .arg(&reports)
        .assert()
        .success()
        .stdout(predicate::str::contains("Succeeded"))
        .stdout(predicate::str::contains("All hosts succeeded."));

    let written: Vec<_> = std::fs::read_dir(&reports)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(written.len(), 1);
    let name = written[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.ends_with("_summary_localhost.txt"), "{}", name);
    assert_eq!(
        std::fs::read_to_string(&written[0]).unwrap(),
        "host=localhost greeting=hello\n"
    );
}

#[test]
fn test_run_failure_exits_with_two() {
    let dir = TempDir::new().unwrap();
    let inventory = write(&dir, "hosts.yml", LOCAL_INVENTORY);
    let playbook = write(
        &dir,
        "site.yml",
        r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: broken
      shell: exit 3
    - name: never
      shell: echo never
"#,
    );

    provisor()
        .arg("-i")
        .arg(&inventory)
        .arg("run")
        .arg(&playbook)
        .arg("--reports-dir")
        .arg(dir.path().join("out"))
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Failed: broken, non-zero return code 3"))
        .stdout(predicate::str::contains("never (host failed)"));
}

#[test]
fn test_check_mode_leaves_filesystem_alone() {
    let dir = TempDir::new().unwrap();
    let inventory = write(&dir, "hosts.yml", LOCAL_INVENTORY);
    let marker = dir.path().join("marker");
    let playbook = write(
        &dir,
        "site.yml",
        &format!(
            r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: touch marker
      shell: touch {}
"#,
            marker.display()
        ),
    );

    provisor()
        .arg("-i")
        .arg(&inventory)
        .arg("--check")
        .arg("run")
        .arg(&playbook)
        .arg("--reports-dir")
        .arg(dir.path().join("out"))
        .assert()
        .success();

    assert!(!marker.exists());
}

#[test]
fn test_run_without_inventory_fails() {
    let dir = TempDir::new().unwrap();
    let playbook = write(
        &dir,
        "site.yml",
        r#"
- hosts: all
  tasks:
    - name: hello
      debug: hello
"#,
    );

    provisor()
        .current_dir(dir.path())
        .arg("run")
        .arg(&playbook)
        .assert()
        .failure()
        .stderr(predicate::str::contains("inventory"));
}

#[test]
fn test_run_with_unmatched_limit_exits_with_five() {
    let dir = TempDir::new().unwrap();
    let inventory = write(&dir, "hosts.yml", LOCAL_INVENTORY);
    let playbook = write(
        &dir,
        "site.yml",
        r#"
- hosts: all
  tasks:
    - name: hello
      debug: hello
"#,
    );

    provisor()
        .arg("-i")
        .arg(&inventory)
        .args(["--limit", "nowhere"])
        .arg("run")
        .arg(&playbook)
        .assert()
        .code(5);
}
