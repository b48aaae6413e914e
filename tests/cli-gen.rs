use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use std::process::Command; // Run programs

#[test]
/// Test gen-pass
fn gen_pass() {
    let mut cmd = Command::cargo_bin("pgrole").unwrap();
    cmd.arg("gen-pass")
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated password:"))
        .stdout(predicate::str::contains(
            "Hint: Please provide --username to generate MD5",
        ));
}

#[test]
/// Test gen-pass with --length
fn gen_pass_with_length() {
    let mut cmd = Command::cargo_bin("pgrole").unwrap();
    cmd.arg("gen-pass")
        .arg("--length")
        .arg("32")
        .assert()
        .success()
        .stdout(predicate::str::is_match("Generated password: .{32}\n").unwrap());
}

#[test]
/// Test gen-pass with --username
fn gen_pass_with_username() {
    let mut cmd = Command::cargo_bin("pgrole").unwrap();
    cmd.arg("gen-pass")
        .arg("--username")
        .arg("test")
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated password:"))
        .stdout(predicate::str::contains("Generated MD5 (user: test): md5"));
}

#[test]
/// Test gen-pass with --username and --password, generate MD5
/// For example:
/// ```
/// ./pgrole gen-pass --username duyet --password 123456
///
/// Generated password: 123456
/// Generated MD5 (user: duyet): md5de3331387913465470ce1772a279be8e
/// ```
fn gen_pass_with_username_and_password() {
    let mut cmd = Command::cargo_bin("pgrole").unwrap();
    cmd.arg("gen-pass")
        .arg("--username")
        .arg("duyet")
        .arg("--password")
        .arg("123456")
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated password: 123456"))
        .stdout(predicate::str::contains(
            "Generated MD5 (user: duyet): md5de3331387913465470ce1772a279be8e",
        ));
}
