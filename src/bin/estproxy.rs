//! EST proxy command line tool.

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use clap::{ArgAction, Parser};
use est::{
    proxy::{HttpAuth, Proxy, ProxyConfig, UpstreamConfig, DEFAULT_LISTEN_PORT},
    Credential, EstError, SrpVerifierDb, DEFAULT_BASIC_PASSWORD, DEFAULT_BASIC_USER,
    DEFAULT_DIGEST_REALM,
};
use eyre::WrapErr as _;
use zeroize::Zeroizing;

/// EST (RFC 7030) proxy in front of an upstream CA.
#[derive(Debug, Parser)]
#[command(name = "estproxy", version, disable_help_flag = true)]
struct Args {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Upstream EST server
    #[arg(short = 's', value_name = "HOST")]
    server: String,

    /// Upstream EST server port
    #[arg(short = 'p', value_name = "PORT")]
    port: u16,

    /// Listen port
    #[arg(short = 'l', value_name = "PORT", default_value_t = DEFAULT_LISTEN_PORT)]
    listen_port: u16,

    /// Proxy certificate (PEM), used for both TLS legs
    #[arg(short = 'c', value_name = "FILE")]
    cert: PathBuf,

    /// Proxy private key (PEM)
    #[arg(short = 'k', value_name = "FILE")]
    key: PathBuf,

    /// HTTP auth realm; with -h it must be the realm of the digest credentials
    #[arg(short = 'r', value_name = "REALM", default_value = DEFAULT_DIGEST_REALM)]
    realm: String,

    /// Disable HTTP authentication; clients must present a certificate
    #[arg(short = 'n')]
    no_http_auth: bool,

    /// Use HTTP Digest instead of Basic authentication
    #[arg(short = 'h')]
    digest: bool,

    /// Require proof-of-possession in enrollment CSRs
    #[arg(short = 't')]
    pop_check: bool,

    /// SRP verifier file; validated, then refused since the TLS backend has no SRP
    #[arg(long, value_name = "FILE")]
    srp: Option<PathBuf>,

    /// Stop accepting connections after this many seconds
    #[arg(short = 'd', value_name = "SECS")]
    shutdown_after: Option<u64>,

    /// Listen on IPv6
    #[arg(short = '6')]
    ipv6: bool,

    /// Verbose logging
    #[arg(short = 'v')]
    verbose: bool,

    /// HTTP Basic user presented to the upstream CA
    #[arg(long, value_name = "USER", default_value = DEFAULT_BASIC_USER)]
    upstream_user: String,

    /// HTTP Basic password presented to the upstream CA
    #[arg(long, value_name = "PASSWORD", default_value = DEFAULT_BASIC_PASSWORD)]
    upstream_password: String,

    /// Trust store for client certificates and the upstream CA
    #[arg(long, value_name = "FILE", env = "EST_TRUSTED_CERTS", hide = true)]
    trusted_certs: Option<PathBuf>,

    /// Local answer to /cacerts
    #[arg(long, value_name = "FILE", env = "EST_CACERTS_RESP", hide = true)]
    cacerts_resp: Option<PathBuf>,
}

fn config_err(msg: impl Into<String>) -> EstError {
    EstError::Configuration(msg.into())
}

fn read(path: &Path) -> Result<Vec<u8>, EstError> {
    fs::read(path).map_err(|err| config_err(format!("unable to read {}: {err}", path.display())))
}

fn proxy_config(args: Args) -> Result<ProxyConfig, EstError> {
    let Some(trusted_certs) = &args.trusted_certs else {
        return Err(config_err("EST_TRUSTED_CERTS must be set"));
    };
    let trusted_pem = read(trusted_certs)?;

    let cacerts_resp = args
        .cacerts_resp
        .as_deref()
        .map(read)
        .transpose()?;

    let key_pem = Zeroizing::new(
        String::from_utf8(read(&args.key)?)
            .map_err(|_| config_err("private key file is not PEM"))?,
    );
    let cert_pem = String::from_utf8(read(&args.cert)?)
        .map_err(|_| config_err("certificate file is not PEM"))?;
    let identity = Credential::parse(key_pem, cert_pem)?;

    let srp_db = args.srp.as_ref().map(SrpVerifierDb::load).transpose()?;

    let http_auth = match (args.no_http_auth, args.digest) {
        (true, _) => HttpAuth::Disabled,
        (false, true) => HttpAuth::Digest,
        (false, false) => HttpAuth::Basic,
    };

    let workers = std::thread::available_parallelism().map_or(1, usize::from);

    Ok(ProxyConfig {
        listen_port: args.listen_port,
        ipv6: args.ipv6,
        identity,
        trusted_pem: trusted_pem.clone(),
        cacerts_resp,
        http_auth,
        realm: args.realm,
        pop_check: args.pop_check,
        srp_db,
        shutdown_after: args.shutdown_after.map(Duration::from_secs),
        workers,
        upstream: UpstreamConfig {
            server: args.server,
            port: args.port,
            trusted_pem,
            user: args.upstream_user,
            password: Zeroizing::new(args.upstream_password),
            timeout: Duration::from_secs(60),
        },
    })
}

#[actix_web::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(255),
            };
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if args.verbose { "info" } else { "warn" },
    ))
    .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> eyre::Result<()> {
    let config = proxy_config(args).wrap_err("invalid proxy configuration")?;
    log::debug!("{config:?}");

    let proxy = Proxy::bind(config).wrap_err("unable to start proxy")?;
    proxy.run().await.wrap_err("proxy stopped with an error")?;

    log::info!("EST proxy stopped");

    Ok(())
}
