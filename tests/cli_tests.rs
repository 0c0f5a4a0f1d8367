use std::fs;
use std::path::PathBuf;
use std::process;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_source(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("txsc-cli-{}-{name}", process::id()));
    fs::write(&path, contents).expect("write source file");
    path
}

#[test]
fn compiles_to_asm_on_stdout() {
    let src = write_source("p2pkh.txs", concat!(
        "assume sig, pubkey;\n",
        "verify hash160(pubkey) == '1010101010101010101010101010101010101010';\n",
        "checkSig(sig, pubkey);\n",
    ));
    Command::cargo_bin("txsc")
        .expect("binary builds")
        .arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("OP_DUP OP_HASH160 0x14 1010101010101010101010101010101010101010 OP_EQUALVERIFY OP_CHECKSIG"));
}

#[test]
fn compiles_to_hex_with_target_flag() {
    let src = write_source("four.txs", "let mutable a = 3; a = a + 1; a;\n");
    Command::cargo_bin("txsc")
        .expect("binary builds")
        .args([src.to_str().unwrap(), "--target", "hex"])
        .assert()
        .success()
        .stdout(predicate::str::contains("54"));
}

#[test]
fn reports_compile_errors_with_nonzero_exit() {
    let src = write_source("bad.txs", "let a = 1; a = 2;\n");
    Command::cargo_bin("txsc")
        .expect("binary builds")
        .arg(&src)
        .assert()
        .failure()
        .stderr(predicate::str::contains("immutable"));
}

#[test]
fn warns_about_implicit_pushes_on_stderr() {
    let src = write_source("warn.txs", "5;\n");
    Command::cargo_bin("txsc")
        .expect("binary builds")
        .arg(&src)
        .assert()
        .success()
        .stderr(predicate::str::contains("implicitly"));
}

#[test]
fn reemits_existing_assembly() {
    let src = write_source("asm.txs", "2 5 ADD\n");
    Command::cargo_bin("txsc")
        .expect("binary builds")
        .args([src.to_str().unwrap(), "--from-asm", "--target", "hex"])
        .assert()
        .success()
        .stdout(predicate::str::contains("525593"));
}

#[test]
fn rejects_unknown_options() {
    Command::cargo_bin("txsc")
        .expect("binary builds")
        .args(["--bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown option"));
}
