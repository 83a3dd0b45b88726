use clap::Parser;
use fhevm_core_client::{execute_cmd, load_config, CCCommand, CmdConfig, CoreClientConfig};
use fhevm_session::ResultType;
use std::io::Write;

const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

fn parse(args: &[&str]) -> CmdConfig {
    CmdConfig::try_parse_from(std::iter::once("fhevm-core-client").chain(args.iter().copied()))
        .unwrap()
}

#[test]
fn test_parse_commands() {
    let cmd = parse(&["user-decrypt", "--handle", "0x01", "-t", "euint32"]);
    assert_eq!(cmd.chain_id, 31337);
    assert!(!cmd.simulated);
    match cmd.command {
        CCCommand::UserDecrypt(p) => {
            assert_eq!(p.handle, "0x01");
            assert_eq!(p.result_type, ResultType::Euint32);
            assert!(p.contract.is_none());
        }
        other => panic!("unexpected command {other:?}"),
    }

    let cmd = parse(&["-c", "11155111", "-s", "encrypt", "-v", "7"]);
    assert_eq!(cmd.chain_id, 11155111);
    assert!(cmd.simulated);
    assert!(matches!(cmd.command, CCCommand::Encrypt(ref p) if p.value == 7));

    assert!(CmdConfig::try_parse_from(["fhevm-core-client", "demo", "--balance", "10"]).is_err());
    assert!(CmdConfig::try_parse_from([
        "fhevm-core-client",
        "user-decrypt",
        "--handle",
        "0x01",
        "-t",
        "euint64"
    ])
    .is_err());
}

#[test]
fn test_load_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        "private_key = \"{TEST_KEY}\"\n[session.local]\ngateway_chain_id = 4242\n[tracing]\nservice_name = \"core_client\""
    )
    .unwrap();
    let conf = load_config(path.to_str()).unwrap();
    assert_eq!(conf.session.local.gateway_chain_id, 4242);
    assert_eq!(conf.tracing_settings().service_name(), "core_client");
    assert!(!format!("{conf:?}").contains(TEST_KEY));

    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "[session.local]\ngateway_chain_id = 0").unwrap();
    assert!(load_config(path.to_str()).is_err());
}

#[tokio::test]
async fn test_resolve() {
    let conf = CoreClientConfig::default();
    let out = execute_cmd(&parse(&["resolve", "-c", "11155111"]), &conf)
        .await
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value["mode"], "remote");
    assert_eq!(out[0].value["gateway_chain_id"], 55815);

    let err = execute_cmd(&parse(&["resolve", "-c", "1"]), &conf)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Unsupported network"));
}

#[tokio::test]
async fn test_simulated_encrypt() {
    let conf = CoreClientConfig::default();
    let out = execute_cmd(
        &parse(&["--simulated", "--private-key", TEST_KEY, "encrypt", "-v", "12"]),
        &conf,
    )
    .await
    .unwrap();
    let handles = out[0].value["handles"].as_array().unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].as_str().unwrap().len(), 66);
    assert!(out[0].value["input_proof"].as_str().unwrap().starts_with("0x"));
}

#[tokio::test]
async fn test_encrypt_needs_a_deployed_contract() {
    let conf = CoreClientConfig::default();
    let err = execute_cmd(&parse(&["-c", "11155111", "encrypt", "-v", "1"]), &conf)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("pass --contract"));
}

#[tokio::test]
async fn test_demo_round_trip() {
    let conf = CoreClientConfig::default();
    let out = execute_cmd(&parse(&["demo", "--balance", "1000", "--transfer", "500"]), &conf)
        .await
        .unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[1].value["sufficient"], true);

    let out = execute_cmd(&parse(&["demo", "--balance", "100", "--transfer", "500"]), &conf)
        .await
        .unwrap();
    assert_eq!(out[1].value["sufficient"], false);
}
