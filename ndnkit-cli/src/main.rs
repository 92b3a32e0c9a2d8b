use std::env;
use std::io::{self, Read, Write};
use std::process::exit;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use log::debug;

use ndnkit_core::keychain::{certificate, check_slot_id, FsBackend, KeyChain, ValidityPeriod};
use ndnkit_core::packets::Data;
use ndnkit_core::signature::EcdsaPrivateKey;
use ndnkit_core::{tlv, Name, Region};

const KEYCHAIN_ENV: &str = "NDNKIT_KEYCHAIN";
const REGION_CAPACITY: usize = 65536;

fn main() {
    env_logger::init();

    let matches = Command::new("ndnkit-keychain")
        .version("0.1.0")
        .about("Key pair and certificate management for an NDNKIT keychain")
        .after_help(format!(
            "Required environment variable: {KEYCHAIN_ENV}=/path/to/keychain\n\
             ID can only have digits and lower case letters."
        ))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("keygen")
                .about("Generate a key pair for NAME, save to ID, print the self-signed certificate")
                .arg(Arg::new("id").required(true).help("Keychain slot id"))
                .arg(Arg::new("name").required(true).help("Subject name URI")),
        )
        .subcommand(
            Command::new("certinfo")
                .about("Show information about the certificate of ID")
                .arg(Arg::new("id").required(true).help("Keychain slot id")),
        )
        .subcommand(
            Command::new("certexport")
                .about("Export the certificate of ID to stdout")
                .arg(Arg::new("id").required(true).help("Keychain slot id")),
        )
        .subcommand(
            Command::new("certsign")
                .about("Issue a certificate from stdin, signing with the key of ID")
                .arg(Arg::new("id").required(true).help("Issuer slot id")),
        )
        .subcommand(
            Command::new("certimport")
                .about("Install a certificate from stdin to ID")
                .arg(Arg::new("id").required(true).help("Keychain slot id")),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("keygen", sub)) => keygen(sub),
        Some(("certinfo", sub)) => certinfo(sub),
        Some(("certexport", sub)) => certexport(sub),
        Some(("certsign", sub)) => certsign(sub),
        Some(("certimport", sub)) => certimport(sub),
        _ => unreachable!("subcommand is required"),
    };

    if let Err(e) = result {
        eprintln!("ndnkit-keychain: {e:#}");
        exit(4);
    }
}

fn open_keychain() -> Result<KeyChain<FsBackend>> {
    let root = env::var(KEYCHAIN_ENV)
        .map_err(|_| anyhow!("environment variable {KEYCHAIN_ENV} is not set"))?;
    debug!("opening keychain at {root}");
    Ok(KeyChain::new(FsBackend::new(root)))
}

fn arg<'a>(sub: &'a ArgMatches, name: &str) -> &'a str {
    sub.get_one::<String>(name).map(String::as_str).unwrap_or("")
}

fn checked_id(sub: &ArgMatches) -> Result<&str> {
    let id = arg(sub, "id");
    check_slot_id(id)
        .map_err(|_| anyhow!("bad slot id {id:?}: use digits and lower case letters"))?;
    Ok(id)
}

fn keygen(sub: &ArgMatches) -> Result<()> {
    let id = checked_id(sub)?;
    let mut keychain = open_keychain()?;

    let mut buf = vec![0u8; REGION_CAPACITY];
    let mut region = Region::new(&mut buf);
    let subject =
        Name::parse(&mut region, arg(sub, "name")).context("cannot parse subject name URI")?;
    let key_name = certificate::make_key_name(&mut region, &subject)?;
    let (pvt, public) = EcdsaPrivateKey::generate(&key_name);
    let cert = certificate::self_sign(&mut region, ValidityPeriod::max(), &pvt, &public)
        .context("cannot build self-signed certificate")?;

    keychain.set_key(id, &pvt.to_pkcs8()?)?;
    keychain.set_cert(id, cert)?;
    io::stdout().write_all(cert)?;
    Ok(())
}

fn certinfo(sub: &ArgMatches) -> Result<()> {
    let id = checked_id(sub)?;
    let keychain = open_keychain()?;

    let blob = keychain.get_cert(id)?;
    let cert = decode_certificate(&blob)?;
    let validity = certificate::validity(&cert)
        .ok_or_else(|| anyhow!("certificate has no validity period"))?;

    println!("Name:     {}", cert.name);
    println!(
        "Issuer:   {}",
        certificate::issuer(&cert).unwrap_or_default()
    );
    println!("Validity: {validity}");
    Ok(())
}

fn certexport(sub: &ArgMatches) -> Result<()> {
    let id = checked_id(sub)?;
    let keychain = open_keychain()?;
    let blob = keychain.get_cert(id)?;
    io::stdout().write_all(&blob)?;
    Ok(())
}

fn certsign(sub: &ArgMatches) -> Result<()> {
    let id = checked_id(sub)?;
    let keychain = open_keychain()?;

    let issuer_cert_blob = keychain
        .get_cert(id)
        .context("issuer certificate not found")?;
    let issuer_cert = decode_certificate(&issuer_cert_blob)?;
    let issuer_key_blob = keychain.get_key(id).context("issuer key not found")?;
    let issuer_pvt = EcdsaPrivateKey::from_pkcs8(&issuer_cert.name, &issuer_key_blob)?;

    let request_blob = read_stdin()?;
    let request = decode_certificate(&request_blob)?;
    let subject_pub = certificate::public_key(&request)?;
    if request.name.size() < 2 {
        bail!("certificate request name is too short");
    }

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let validity = ValidityPeriod {
        not_before: now,
        not_after: now + 86_400 * 90,
    };

    let mut buf = vec![0u8; REGION_CAPACITY];
    let mut region = Region::new(&mut buf);
    let key_name = request.name.get_prefix(-2);
    let cert_name = certificate::make_cert_name(&mut region, &key_name, id.as_bytes(), now)?;
    let cert = certificate::build(&mut region, cert_name, validity, &subject_pub, &issuer_pvt)?;
    io::stdout().write_all(cert)?;
    Ok(())
}

fn certimport(sub: &ArgMatches) -> Result<()> {
    let id = checked_id(sub)?;
    let mut keychain = open_keychain()?;

    let blob = read_stdin()?;
    decode_certificate(&blob).context("input is not a certificate")?;
    keychain.set_cert(id, &blob)?;
    Ok(())
}

fn decode_certificate(blob: &[u8]) -> Result<Data<'_>> {
    let (outer, _) = tlv::read_tlv(blob).context("cannot read certificate TLV")?;
    Data::decode(&outer).context("cannot decode certificate")
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut blob = Vec::new();
    io::stdin().read_to_end(&mut blob)?;
    Ok(blob)
}
