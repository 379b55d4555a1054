use anyhow::anyhow;
use chrono::{Duration, Utc};
use clap::Parser;
use const_format::concatcp;
use rand::{seq::SliceRandom, Rng};
use reqwest::{
    blocking::{Client, Response},
    StatusCode,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::env;
use std::fs::File;
use std::ops::{AddAssign, Div};
use std::process::{self, Child, Command, Stdio};
use std::thread;
use std::time::{Duration as StdDuration, Instant};

const LOCAL_PORT: u32 = 8374;
const LOCAL_URL: &str = concatcp!("http://127.0.0.1:", LOCAL_PORT);

const LOCAL_ADMIN_USERNAME: &str = "benchmark-admin";
const LOCAL_ADMIN_PASSWORD: &str = "benchmark-password";

#[rustfmt::skip]
const ROCKET_ENV: &[(&str, &str)] = &[
    ("ROCKET_PORT", concatcp!(LOCAL_PORT)),
    ("ROCKET_SECRET_KEY", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
    ("ROCKET_JWT_SECRET", "dummy"),
    ("ROCKET_STORAGE", "memory"),
    ("ROCKET_ADMIN_USERNAME", LOCAL_ADMIN_USERNAME),
];

#[rustfmt::skip]
const BALLOT: &[(&str, &[&str])] = &[
    ("President", &["Alice Adams", "Bob Brown", "Carol Chen", "Dave Diaz"]),
    ("Vice President", &["Eve Evans", "Fred Fox"]),
    ("Treasurer", &["Grace Green", "Henry Hill", "Irene Ito"]),
    ("Secretary", &["Joe Jones", "Kim Kaur"]),
];

#[derive(Parser)]
struct Args {
    /// Silence local server logging.
    #[arg(short, long)]
    quiet: bool,

    /// Send local server logging to this file; takes precedence over --quiet.
    #[arg(long)]
    logfile: Option<String>,

    /// Connect to a remote server at this URL instead of running a local one.
    #[arg(long)]
    remote: Option<String>,

    /// Administrator username for a remote server.
    #[arg(long, default_value = LOCAL_ADMIN_USERNAME)]
    admin_username: String,

    /// Administrator password for a remote server.
    #[arg(long, default_value = LOCAL_ADMIN_PASSWORD)]
    admin_password: String,

    /// How many threads to use. Defaults to the number of logical CPUs.
    #[arg(long, default_value_t = num_cpus::get())]
    threads: usize,

    /// How many voters each thread registers and votes as.
    #[arg(long, default_value_t = 100)]
    voters_per_thread: usize,

    /// After each ballot, submit it again and expect it to be refused.
    #[arg(long)]
    resubmit: bool,
}

/// Construct a URL from segments.
macro_rules! url {
    ($($segment:expr),+) => {{
        std::path::PathBuf::from_iter([$($segment),+]).to_str().unwrap()
    }}
}

/// Build the server and set up its environment.
fn setup_deps(admin_password: &str) -> anyhow::Result<()> {
    Command::new("cargo")
        .args(["build", "--release", "--bin", "election-backend"])
        .status()?
        .success()
        .then_some(())
        .ok_or_else(|| anyhow!("server build exited nonzero"))?;

    let salt: [u8; 16] = rand::thread_rng().gen();
    let hash = argon2::hash_encoded(admin_password.as_bytes(), &salt, &argon2::Config::default())?;
    env::set_var("ROCKET_ADMIN_PASSWORD_HASH", hash);
    for (var, val) in ROCKET_ENV {
        env::set_var(var, val);
    }

    Ok(())
}

/// Terminate the given child process. This is a SIGTERM on unix and a hard-kill on other
/// platforms.
fn terminate_child(child: &mut Child) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let pid = nix::unistd::Pid::from_raw(child.id() as i32);
        nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM)?;
    }
    #[cfg(not(unix))]
    {
        child.kill()?;
    }
    Ok(())
}

/// Start the server and wait until it answers.
fn launch_server(logfile: Stdio) -> anyhow::Result<Child> {
    let mut proc = Command::new("./target/release/election-backend")
        .stdout(logfile)
        .spawn()?;

    let client = Client::new();
    loop {
        let resp = client
            .get(url!(LOCAL_URL, "auth/check"))
            .send()
            .and_then(Response::error_for_status);

        if let Ok(resp) = resp {
            let text = resp.text();
            if let Ok("Unauthenticated") = text.as_deref() {
                break;
            } else {
                terminate_child(&mut proc)?;
                proc.wait()?;
                return Err(anyhow!("Bad response: {:?}", text));
            }
        }

        // Check the server didn't exit.
        if let Some(retcode) = proc.try_wait()? {
            return Err(anyhow!("Server exited prematurely with code {}", retcode));
        }
        thread::sleep(StdDuration::from_millis(50));
    }

    Ok(proc)
}

/// A client signed in as the administrator.
fn admin_client(url: &str, username: &str, password: &str) -> anyhow::Result<Client> {
    let client = Client::builder().cookie_store(true).build()?;
    client
        .post(url!(url, "auth/admin"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .and_then(Response::error_for_status)?;
    Ok(client)
}

/// The positions on the ballot and the IDs of the candidates for each.
type Catalog = Vec<(String, Vec<u32>)>;

/// Open the voting window and create the positions and candidates.
fn setup_election(admin: &Client, url: &str) -> anyhow::Result<Catalog> {
    let start = Utc::now() - Duration::hours(1);
    let end = start + Duration::hours(2);
    admin
        .put(url!(url, "admin/election"))
        .json(&json!({ "start_time": start, "end_time": end }))
        .send()
        .and_then(Response::error_for_status)?;

    #[derive(Deserialize)]
    struct Created<T> {
        id: T,
    }

    let mut catalog = Vec::with_capacity(BALLOT.len());
    for (title, names) in BALLOT {
        let Created { id: position } = admin
            .post(url!(url, "admin/positions"))
            .json(&json!({ "title": title }))
            .send()
            .and_then(Response::error_for_status)?
            .json::<Created<String>>()?;

        let mut candidates = Vec::with_capacity(names.len());
        for name in names.iter() {
            let Created { id } = admin
                .post(url!(url, "admin/candidates"))
                .json(&json!({ "name": name, "position": position }))
                .send()
                .and_then(Response::error_for_status)?
                .json::<Created<u32>>()?;
            candidates.push(id);
        }
        catalog.push((position, candidates));
    }

    Ok(catalog)
}

/// Durations of each part of the voting process.
#[derive(Debug, Default)]
struct VoteTimings {
    register: StdDuration,
    auth: StdDuration,
    cast: StdDuration,
}

impl AddAssign for VoteTimings {
    fn add_assign(&mut self, rhs: Self) {
        self.register += rhs.register;
        self.auth += rhs.auth;
        self.cast += rhs.cast;
    }
}

impl Div<u32> for VoteTimings {
    type Output = Self;

    fn div(self, rhs: u32) -> Self {
        Self {
            register: self.register / rhs,
            auth: self.auth / rhs,
            cast: self.cast / rhs,
        }
    }
}

impl VoteTimings {
    fn total(&self) -> StdDuration {
        self.register + self.auth + self.cast
    }
}

/// Register a voter, sign in with their code, and cast a random complete ballot.
fn vote(
    url: &str,
    admin: &Client,
    catalog: &Catalog,
    voter_num: usize,
    resubmit: bool,
) -> anyhow::Result<VoteTimings> {
    // Registration.
    let pre_register = Instant::now();
    #[derive(Deserialize)]
    struct CreatedVoter {
        login_code: String,
    }
    let CreatedVoter { login_code } = admin
        .post(url!(url, "admin/voters"))
        .json(&json!({
            "email": format!("voter{voter_num}@bench.example.edu"),
            "name": format!("Voter {voter_num}"),
        }))
        .send()
        .and_then(Response::error_for_status)?
        .json()?;
    let register = pre_register.elapsed();

    // Sign in.
    let pre_auth = Instant::now();
    let client = Client::builder().cookie_store(true).build()?;
    client
        .post(url!(url, "auth/voter"))
        .json(&json!({ "code": login_code }))
        .send()
        .and_then(Response::error_for_status)?;
    let auth = pre_auth.elapsed();

    // Cast.
    let ballot = {
        let mut rng = rand::thread_rng();
        catalog
            .iter()
            .map(|(position, candidates)| {
                json!({
                    "position_id": position,
                    "candidate_id": candidates.choose(&mut rng),
                })
            })
            .collect::<Vec<_>>()
    };
    let pre_cast = Instant::now();
    client
        .post(url!(url, "voter/ballot"))
        .json(&ballot)
        .send()
        .and_then(Response::error_for_status)?;
    let cast = pre_cast.elapsed();

    if resubmit {
        let status = client
            .post(url!(url, "voter/ballot"))
            .json(&ballot)
            .send()?
            .status();
        if status != StatusCode::CONFLICT {
            return Err(anyhow!("Resubmitted ballot got {status}, expected 409"));
        }
    }

    Ok(VoteTimings {
        register,
        auth,
        cast,
    })
}

/// Run the benchmark, returning how many ballots were accepted.
fn benchmark(
    url: &str,
    admin: &Client,
    catalog: &Catalog,
    num_threads: usize,
    voters_per_thread: usize,
    resubmit: bool,
) -> anyhow::Result<usize> {
    let end_val = num_threads * voters_per_thread;

    let start = Instant::now();
    thread::scope(|s| {
        let mut threads = Vec::with_capacity(num_threads);

        for first in (0..end_val).step_by(voters_per_thread) {
            let t = s.spawn(move || {
                let mut timings = VoteTimings::default();
                for voter_num in first..(first + voters_per_thread) {
                    timings += vote(url, admin, catalog, voter_num, resubmit)?;
                }
                Ok::<_, anyhow::Error>(timings / voters_per_thread as u32)
            });
            threads.push(t);
        }

        let mut timings = VoteTimings::default();
        for t in threads {
            timings += t.join().map_err(|_| anyhow!("benchmark thread panicked"))??;
        }
        let total_duration = start.elapsed();

        let avg = timings / num_threads as u32;
        let votes_per_sec = end_val as f64 / total_duration.as_secs_f64();

        println!("register: {:?}", avg.register);
        println!("auth:     {:?}", avg.auth);
        println!("cast:     {:?}", avg.cast);
        println!("\ntotal: {:?} per voter", avg.total());
        println!(
            "actual duration: {} ballots in {:?} ({:.2}/s)",
            end_val, total_duration, votes_per_sec
        );

        Ok(end_val)
    })
}

/// Check every accepted ballot was counted exactly once.
fn verify(url: &str, catalog: &Catalog, accepted: usize) -> anyhow::Result<()> {
    let tallies: BTreeMap<u32, u64> = Client::new()
        .get(url!(url, "results/tallies"))
        .send()
        .and_then(Response::error_for_status)?
        .json()?;

    for (position, candidates) in catalog {
        let total: u64 = candidates
            .iter()
            .map(|id| tallies.get(id).copied().unwrap_or_default())
            .sum();
        if total != accepted as u64 {
            return Err(anyhow!(
                "{position} has {total} votes, expected {accepted}"
            ));
        }
    }
    println!("verified: every position has exactly {accepted} votes");

    Ok(())
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let url = args.remote.as_deref().unwrap_or(LOCAL_URL);

    // If we're not connecting remotely, bring up a local server.
    let mut proc: Option<Child> = None;
    if args.remote.is_none() {
        setup_deps(&args.admin_password)?;
        let logfile = match args.logfile {
            Some(ref path) => Stdio::from(File::create(path)?),
            None => {
                if args.quiet {
                    Stdio::null()
                } else {
                    Stdio::inherit()
                }
            }
        };
        proc = Some(launch_server(logfile)?);
    }

    // Use a closure to ensure the cleanup below runs.
    let result = (|| {
        let admin = admin_client(url, &args.admin_username, &args.admin_password)?;
        let catalog = setup_election(&admin, url)?;
        let accepted = benchmark(
            url,
            &admin,
            &catalog,
            args.threads,
            args.voters_per_thread,
            args.resubmit,
        )?;
        verify(url, &catalog, accepted)
    })();

    // Kill the server.
    if let Some(p) = proc.as_mut() {
        terminate_child(p)?;
        p.wait()?;
    }

    result
}

fn main() {
    if let Err(e) = run() {
        eprintln!("FATAL: {}", e);
        process::exit(1);
    }
}
