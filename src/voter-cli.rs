//! A command-line voter client.
//! Votes are signed locally, so the private key never leaves this process.

use std::fmt::{Display, Formatter};

use chainballot_protocol::{sign_vote, CandidateId, ElectionId, PrivateKey};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use chainballot_backend::{
    error::ErrorBody,
    model::api::{
        ballot::{BallotSubmission, CastReceiptDesc},
        tally::TallyDesc,
        voter::{AuthenticatedVoterDesc, VoterLoginRequest},
    },
    voting::now_millis,
};

const PROGRAM_NAME: &str = "chainballot-voter";

const ABOUT_TEXT: &str = "Cast a vote or read the tally of a ChainBallot election.

EXIT CODES:
     0: Success.
     1: Error.
     2: You have already voted in this election.";

const SERVER: &str = "SERVER";
const ELECTION_CODE: &str = "ELECTION_CODE";
const VOTER_CODE: &str = "VOTER_CODE";
const CANDIDATE: &str = "CANDIDATE";
const PRIVATE_KEY: &str = "PRIVATE_KEY";
const ELECTION_ID: &str = "ELECTION_ID";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    let server = Arg::new(SERVER)
        .long("server")
        .help("Base URL of the voting server")
        .action(ArgAction::Set)
        .default_value("http://localhost:8000");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .subcommand(
            Command::new("cast")
                .about("Sign and cast a vote")
                .arg(server.clone())
                .arg(
                    Arg::new(ELECTION_CODE)
                        .long("election")
                        .help("Public code of the election")
                        .action(ArgAction::Set)
                        .required(true),
                )
                .arg(
                    Arg::new(VOTER_CODE)
                        .long("voter-code")
                        .help("Your one-time access code")
                        .action(ArgAction::Set)
                        .required(true),
                )
                .arg(
                    Arg::new(CANDIDATE)
                        .long("candidate")
                        .help("ID of the candidate to vote for")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(CandidateId))
                        .required(true),
                )
                .arg(
                    Arg::new(PRIVATE_KEY)
                        .long("private-key")
                        .help("Your private key, as issued (hex)")
                        .action(ArgAction::Set)
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("tally")
                .about("Print the current tally of an election")
                .arg(server)
                .arg(
                    Arg::new(ELECTION_ID)
                        .long("election-id")
                        .help("Numeric ID of the election")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(ElectionId))
                        .required(true),
                ),
        )
}

/// Errors that this program may produce.
#[derive(Debug)]
enum Error {
    /// The server could not be reached or answered nonsense.
    Network(String),
    /// The server refused the request.
    Server(ErrorBody),
    /// The private key is malformed or belongs to someone else.
    Key(String),
}

impl Error {
    fn exit_code(&self) -> i32 {
        match self {
            Error::Server(body) if body.error == "duplicate_vote" => 2,
            _ => 1,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Network(msg) => write!(f, "Could not talk to the server: {msg}"),
            Error::Server(body) if body.error == "duplicate_vote" => {
                write!(f, "You have already voted")
            }
            Error::Server(body) if body.retryable => {
                write!(f, "{} (temporary, try again)", body.message)
            }
            Error::Server(body) => write!(f, "{}", body.message),
            Error::Key(msg) => write!(f, "Bad private key: {msg}"),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

/// Decode a success body, or the server's error body.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, Error> {
    if response.status().is_success() {
        Ok(response.json().await?)
    } else {
        Err(Error::Server(response.json().await?))
    }
}

/// Authenticate, sign locally, and cast.
async fn cast(client: &Client, args: &ArgMatches) -> Result<CastReceiptDesc, Error> {
    // Unwraps safe as the arguments are required.
    let server = args.get_one::<String>(SERVER).unwrap();
    let election_code = args.get_one::<String>(ELECTION_CODE).unwrap();
    let voter_code = args.get_one::<String>(VOTER_CODE).unwrap();
    let candidate_id = *args.get_one::<CandidateId>(CANDIDATE).unwrap();
    let private_key = PrivateKey::from_hex(args.get_one::<String>(PRIVATE_KEY).unwrap())
        .map_err(|e| Error::Key(e.to_string()))?;

    let login = VoterLoginRequest {
        election_code: election_code.clone(),
        voter_code: voter_code.clone(),
    };
    let voter: AuthenticatedVoterDesc = decode(
        client
            .post(format!("{server}/auth/voter"))
            .json(&login)
            .send()
            .await?,
    )
    .await?;
    if private_key.public_key() != voter.public_key {
        return Err(Error::Key("it does not belong to this access code".to_string()));
    }

    let timestamp = now_millis();
    let signature = sign_vote(&voter.voter_id, candidate_id, &private_key, timestamp)
        .map_err(|e| Error::Key(e.to_string()))?;
    let ballot = BallotSubmission {
        election_code: login.election_code,
        voter_code: login.voter_code,
        candidate_id,
        timestamp,
        signature,
        proof: None,
    };
    decode(
        client
            .post(format!("{server}/vote"))
            .json(&ballot)
            .send()
            .await?,
    )
    .await
}

async fn tally(client: &Client, args: &ArgMatches) -> Result<TallyDesc, Error> {
    // Unwraps safe as the arguments are required.
    let server = args.get_one::<String>(SERVER).unwrap();
    let election_id = args.get_one::<ElectionId>(ELECTION_ID).unwrap();
    decode(
        client
            .get(format!("{server}/elections/{election_id}/tally"))
            .send()
            .await?,
    )
    .await
}

fn print_tally(tally: &TallyDesc) {
    println!("Election {} as of {}:", tally.election_id, tally.captured_at);
    for (candidate, count) in &tally.counts {
        println!(
            "  candidate {candidate}: {count} vote{}",
            if *count != 1 { "s" } else { "" }
        );
    }
    let participation = &tally.participation;
    println!(
        "Turnout: {} of {} registered voters ({:.1}%)",
        participation.votes_cast,
        participation.registered_voters,
        participation.percent()
    );
}

#[rocket::main]
async fn main() {
    let matches = cli().get_matches();
    let client = Client::new();

    let result = match matches.subcommand() {
        Some(("cast", args)) => cast(&client, args).await.map(|receipt| {
            println!("Vote recorded in transaction {}", receipt.tx_hash);
            if !receipt.reconciled {
                println!("(the server will catch up on marking your code as used)");
            }
        }),
        Some(("tally", args)) => tally(&client, args).await.map(|t| print_tally(&t)),
        // Unreachable as a subcommand is required.
        _ => unreachable!(),
    };

    if let Err(err) = result {
        eprintln!("{err}");
        std::process::exit(err.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(kind: &str, retryable: bool) -> Error {
        Error::Server(ErrorBody {
            error: kind.to_string(),
            message: "message".to_string(),
            retryable,
        })
    }

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn duplicate_vote_exits_with_two() {
        let err = server_error("duplicate_vote", false);
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), "You have already voted");

        let err = server_error("transport_error", true);
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("try again"));
    }

    #[test]
    fn cast_arguments_parse() {
        let matches = cli()
            .try_get_matches_from([
                PROGRAM_NAME,
                "cast",
                "--election",
                "EL3CT1",
                "--voter-code",
                "XJ3K9P",
                "--candidate",
                "2",
                "--private-key",
                "00",
            ])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "cast");
        assert_eq!(*args.get_one::<CandidateId>(CANDIDATE).unwrap(), 2);
        assert_eq!(args.get_one::<String>(SERVER).unwrap(), "http://localhost:8000");
    }
}
