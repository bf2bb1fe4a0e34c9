//! EST client command line tool.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use clap::{ArgAction, Parser};
use est::{
    cert, tls, CertFormat, Credential, EnrollmentRequest, EnrollmentSession, EstError,
    HttpCredentials, ServerTrust, TlsTransport,
};
use zeroize::Zeroizing;

/// EST (RFC 7030) enrollment client.
#[derive(Debug, Parser)]
#[command(name = "estclient", version, disable_help_flag = true)]
struct Args {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Verbose logging
    #[arg(short = 'v')]
    verbose: bool,

    /// Get CA certificates
    #[arg(short = 'g')]
    get_ca_certs: bool,

    /// Enroll for a new certificate
    #[arg(short = 'e')]
    enroll: bool,

    /// Get CSR attributes; with -e, build the CSR from them
    #[arg(short = 'a')]
    csr_attrs: bool,

    /// Force proof-of-possession (TLS channel binding in the CSR)
    #[arg(short = 'z')]
    force_pop: bool,

    /// Re-enroll the certificate given with -c/-k
    #[arg(short = 'r')]
    reenroll: bool,

    /// Identity certificate (PEM) for TLS client auth and re-enrollment
    #[arg(short = 'c', value_name = "FILE")]
    cert: Option<PathBuf>,

    /// Identity private key (PEM)
    #[arg(short = 'k', value_name = "FILE")]
    key: Option<PathBuf>,

    /// Private key (PEM) for the new certificate, generated if absent
    #[arg(short = 'x', value_name = "FILE")]
    new_key: Option<PathBuf>,

    /// Pre-built CSR (PEM) to submit as is
    #[arg(short = 'y', value_name = "FILE")]
    csr: Option<PathBuf>,

    /// EST server
    #[arg(short = 's', value_name = "HOST", default_value = "127.0.0.1")]
    server: String,

    /// EST server port
    #[arg(short = 'p', value_name = "PORT", default_value_t = 8085)]
    port: u16,

    /// Output directory
    #[arg(short = 'o', value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Read timeout in seconds
    #[arg(
        short = 'w',
        value_name = "SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..=60),
    )]
    read_timeout: u64,

    /// HTTP auth user
    #[arg(short = 'u', value_name = "USER")]
    user: Option<String>,

    /// HTTP auth password
    #[arg(short = 'h', value_name = "PASSWORD")]
    password: Option<String>,

    /// Subject common name of a generated CSR
    #[arg(long, value_name = "CN", default_value = "127.0.0.1")]
    common_name: String,

    /// Write the issued certificate as PEM instead of PKCS7
    #[arg(long)]
    pem_output: bool,

    /// Use TLS-SRP
    #[arg(long)]
    srp: bool,

    #[arg(long, value_name = "USER")]
    srp_user: Option<String>,

    #[arg(long, value_name = "PASSWORD")]
    srp_password: Option<String>,

    /// Trust anchor file, or "no" to print the server certificate and stop
    #[arg(long, value_name = "FILE|no", env = "EST_OPENSSL_CACERT")]
    trustanchor: Option<String>,
}

/// The operations requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    GetCaCerts,
    GetCsrAttrs,
    Enroll { guided: bool },
    Reenroll,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::GetCaCerts => "Get CA certificates",
            Step::GetCsrAttrs => "Get CSR attributes",
            Step::Enroll { .. } => "Enrollment",
            Step::Reenroll => "Re-enrollment",
        })
    }
}

/// A step that failed, reported with the error's code and description.
#[derive(Debug)]
struct StepFailure {
    step: String,
    err: EstError,
}

impl StepFailure {
    fn new(step: impl fmt::Display, err: EstError) -> Self {
        StepFailure {
            step: step.to_string(),
            err,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed with code {} ({}): {}",
            self.step,
            self.err.code(),
            self.err.description(),
            self.err,
        )
    }
}

impl std::error::Error for StepFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.err)
    }
}

/// Validated command line.
struct ClientConfig {
    steps: Vec<Step>,
    out_dir: PathBuf,
    server: String,
    port: u16,
    read_timeout: Duration,
    tls: rustls::ClientConfig,
    identity: Option<Credential>,
    request: EnrollmentRequest,
    http_auth: Option<HttpCredentials>,
    format: CertFormat,
    force_pop: bool,
}

fn config_err(msg: impl Into<String>) -> EstError {
    EstError::Configuration(msg.into())
}

fn read_file(path: &Path) -> Result<String, EstError> {
    fs::read_to_string(path)
        .map_err(|err| config_err(format!("unable to read {}: {err}", path.display())))
}

impl ClientConfig {
    /// Checks option combinations and loads every input file.
    fn from_args(args: Args) -> Result<Self, EstError> {
        if args.srp || args.srp_user.is_some() || args.srp_password.is_some() {
            return Err(config_err(
                "TLS-SRP is not supported by the TLS backend of this client",
            ));
        }

        if args.enroll && args.reenroll {
            return Err(config_err("-e can't be used with -r"));
        }

        if args.csr.is_some() {
            for (set, flag) in [
                (args.csr_attrs, "-a"),
                (args.new_key.is_some(), "-x"),
                (args.force_pop, "-z"),
                (args.reenroll, "-r"),
            ] {
                if set {
                    return Err(config_err(format!("-y can't be used with {flag}")));
                }
            }
        }

        if args.user.is_some() && args.password.is_none() {
            return Err(config_err("-u requires a password given with -h"));
        }

        let Some(out_dir) = args.out_dir else {
            return Err(config_err("an output directory must be given with -o"));
        };

        if !out_dir.is_dir() {
            return Err(config_err(format!(
                "output directory {} doesn't exist",
                out_dir.display()
            )));
        }

        let mut steps = Vec::new();
        if args.get_ca_certs {
            steps.push(Step::GetCaCerts);
        }
        if args.enroll {
            steps.push(Step::Enroll {
                guided: args.csr_attrs,
            });
        } else if args.csr_attrs {
            steps.push(Step::GetCsrAttrs);
        }
        if args.reenroll {
            steps.push(Step::Reenroll);
        }

        if steps.is_empty() {
            return Err(config_err("nothing to do, use -g, -e, -a or -r"));
        }

        let identity = match (&args.cert, &args.key) {
            (Some(cert), Some(key)) => Some(Credential::parse(
                Zeroizing::new(read_file(key)?),
                read_file(cert)?,
            )?),
            (None, None) => None,
            _ => return Err(config_err("-c and -k must be given together")),
        };

        if args.reenroll && identity.is_none() {
            return Err(config_err("-r requires an identity given with -c and -k"));
        }

        let trust = match args.trustanchor.as_deref() {
            Some("no") => {
                log::warn!("No trust anchor, the server certificate will only be printed");
                ServerTrust::Manual
            }
            Some(path) => {
                let pem = fs::read(path)
                    .map_err(|err| config_err(format!("unable to read {path}: {err}")))?;
                ServerTrust::Anchors(tls::root_store_from_pem(&pem)?)
            }
            None => {
                return Err(config_err(
                    "EST_OPENSSL_CACERT must be set, or --trustanchor given",
                ))
            }
        };

        let tls = tls::client_config(trust, identity.as_ref())?;

        let mut request = EnrollmentRequest::new(args.common_name);
        request.force_pop = args.force_pop;

        if let Some(path) = &args.new_key {
            request.signing_key = Some(cert::read_signing_key_pem(&read_file(path)?)?);
        }

        if let Some(path) = &args.csr {
            request.existing_csr = Some(cert::read_csr_pem(&read_file(path)?)?);
        }

        let http_auth = match (args.user, args.password) {
            (Some(user), Some(password)) => Some(HttpCredentials {
                user,
                password: Zeroizing::new(password),
            }),
            _ => None,
        };

        Ok(ClientConfig {
            steps,
            out_dir,
            server: args.server,
            port: args.port,
            read_timeout: Duration::from_secs(args.read_timeout),
            tls,
            identity,
            request,
            http_auth,
            format: if args.pem_output {
                CertFormat::Pem
            } else {
                CertFormat::Pkcs7
            },
            force_pop: args.force_pop,
        })
    }
}

async fn run(config: ClientConfig) -> eyre::Result<()> {
    let ClientConfig {
        steps,
        out_dir,
        server,
        port,
        read_timeout,
        tls,
        identity,
        request,
        http_auth,
        format,
        force_pop,
    } = config;

    log::info!("EST server {server}:{port}");

    let transport = TlsTransport::new(tls, server, port, read_timeout);
    let mut session = EnrollmentSession::new(transport, out_dir).with_format(format);

    if let Some(identity) = identity {
        session = session.with_identity(identity);
    }

    if let Some(credentials) = http_auth {
        session = session.with_http_auth(credentials);
    }

    let mut request = Some(request);

    for step in steps {
        let res = match step {
            Step::GetCaCerts => session.get_ca_certs().await,
            Step::GetCsrAttrs => session.get_csr_attributes().await,
            Step::Enroll { guided } => match request.take() {
                Some(request) => session.enroll(request, guided).await,
                None => continue,
            },
            Step::Reenroll => session.reenroll(force_pop).await,
        };

        let path = res.map_err(|err| StepFailure::new(step, err))?;
        println!("{step} succeeded, wrote {}", path.display());
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
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

    let config = match ClientConfig::from_args(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", StepFailure::new("Configuration", err));
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
