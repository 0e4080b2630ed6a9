use std::io::Read;
use std::path::PathBuf;

use clap::{
    builder::PossibleValuesParser, value_parser, Arg, ArgAction, ArgMatches,
    Command,
};

use horrorshow::html;

use log::{debug, error};

use sageboard::models::{
    Board, Database, MemoryStore, Page, Response, Store, Thread, ThreadId,
    ThreadRef,
};
use sageboard::parse::render_content;
use sageboard::query::ResponseQuery;
use sageboard::{logging, Config, Error, PostForm, Poster, Result};

const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

fn board_arg() -> Arg {
    Arg::new("board")
        .short('b')
        .long("board")
        .value_name("SLUG")
        .num_args(1)
        .help("Board to use, instead of the configured or default one")
}

fn thread_arg() -> Arg {
    Arg::new("thread")
        .short('t')
        .long("thread")
        .value_name("THREAD")
        .num_args(1)
        .required(true)
        .value_parser(|s: &str| s.parse::<ThreadRef>())
        .help("Thread id, epoch id, or legacy key such as 1700000000.dat")
}

fn post_args(cmd: Command) -> Command {
    cmd.arg(board_arg())
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .num_args(1)
                .help("Author name, optionally with a #trip key"),
        )
        .arg(
            Arg::new("mail")
                .short('m')
                .long("mail")
                .num_args(1)
                .help("Mail field; \"sage\" posts without bumping"),
        )
        .arg(
            Arg::new("ip")
                .long("ip")
                .num_args(1)
                .default_value("127.0.0.1")
                .help("Address the post is made from"),
        )
        .arg(
            Arg::new("content")
                .long("content")
                .num_args(1)
                .help("Text of the post. Read from stdin if not given"),
        )
}

fn command() -> Command {
    Command::new("sagectl")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Control a sageboard instance")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .help("Config file to use"),
        )
        .arg(
            Arg::new("database-url")
                .short('u')
                .long("database-url")
                .value_name("URL")
                .num_args(1)
                .help("URL to use to connect to the database"),
        )
        .arg(
            Arg::new("memory")
                .long("memory")
                .action(ArgAction::SetTrue)
                .help("Use a scratch in-memory store instead of the database"),
        )
        .subcommand(
            Command::new("check-config")
                .about("Check configuration file for errors"),
        )
        .subcommand(
            Command::new("generate-config")
                .about("Print a config file with default values"),
        )
        .subcommand(
            Command::new("add-board")
                .about("Add a new board")
                .arg(
                    Arg::new("slug")
                        .short('s')
                        .long("slug")
                        .required(true)
                        .num_args(1),
                )
                .arg(
                    Arg::new("name")
                        .short('n')
                        .long("name")
                        .required(true)
                        .num_args(1),
                )
                .arg(
                    Arg::new("rule")
                        .short('r')
                        .long("rule")
                        .required(true)
                        .num_args(1)
                        .help("The board's local rule"),
                )
                .arg(
                    Arg::new("default-name")
                        .long("default-name")
                        .num_args(1)
                        .default_value("Anonymous")
                        .help("Name shown for posts without one"),
                )
                .arg(
                    Arg::new("max-length")
                        .long("max-length")
                        .num_args(1)
                        .default_value("2000")
                        .value_parser(value_parser!(i64))
                        .help("Longest allowed post, in UTF-16 code units"),
                )
                .arg(
                    Arg::new("default")
                        .long("default")
                        .action(ArgAction::SetTrue)
                        .help("Make this the default board"),
                ),
        )
        .subcommand(
            Command::new("set-default-board")
                .about("Make a board the default board")
                .arg(Arg::new("slug").required(true).num_args(1)),
        )
        .subcommand(Command::new("boards").about("List active boards"))
        .subcommand(
            Command::new("threads")
                .about("List threads on a board in bump order")
                .arg(board_arg())
                .arg(
                    Arg::new("page")
                        .short('p')
                        .long("page")
                        .num_args(1)
                        .default_value("1")
                        .value_parser(value_parser!(u32).range(1..)),
                ),
        )
        .subcommand(post_args(
            Command::new("post-thread").about("Start a new thread").arg(
                Arg::new("title")
                    .long("title")
                    .required(true)
                    .num_args(1),
            ),
        ))
        .subcommand(post_args(
            Command::new("post-reply")
                .about("Reply to a thread")
                .arg(thread_arg()),
        ))
        .subcommand(
            Command::new("show")
                .about("Show the responses of a thread")
                .arg(board_arg())
                .arg(thread_arg())
                .arg(
                    Arg::new("query")
                        .short('q')
                        .long("query")
                        .num_args(1)
                        .default_value("")
                        .value_parser(|s: &str| ResponseQuery::parse(s))
                        .help("Legacy selector such as l50, 7 or 10-20"),
                )
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .num_args(1)
                        .default_value("text")
                        .value_parser(PossibleValuesParser::new([
                            "text", "html", "json",
                        ])),
                ),
        )
        .subcommand(
            Command::new("render")
                .about("Render markup from stdin into JSON nodes")
                .arg(
                    Arg::new("thread-id")
                        .long("thread-id")
                        .num_args(1)
                        .value_parser(value_parser!(ThreadId))
                        .help("Thread that anchors point into"),
                ),
        )
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .map_err(|err| Error::from_io_error(err, "Couldn't read stdin"))?;
    Ok(buf)
}

/// Load the config file, falling back to defaults when the default file
/// doesn't exist.
fn load_config(matches: &ArgMatches) -> Result<(Config, Option<PathBuf>)> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => (Config::open(path)?, Some(path.to_owned())),
        None => {
            let path = Config::default_path();
            if path.exists() {
                (Config::open(&path)?, Some(path))
            } else {
                (Config::default(), None)
            }
        }
    };

    if let Some(url) = matches.get_one::<String>("database-url") {
        config.0.database_url = url.to_owned();
    }

    Ok(config)
}

/// Pick the board a command acts on: `--board`, then the configured default,
/// then the store's default.
fn board_for(
    store: &dyn Store,
    matches: &ArgMatches,
    config: &Config,
) -> Result<Board> {
    match matches
        .get_one::<String>("board")
        .or(config.default_board.as_ref())
    {
        Some(slug) => store.board_by_slug(slug),
        None => store.default_board(),
    }
}

/// A scratch store with a single default board in it.
fn scratch_store(slug: Option<&String>) -> Result<MemoryStore> {
    let store = MemoryStore::new();
    let mut board = Board::new(
        slug.map(String::as_str).unwrap_or("scratch"),
        "Scratch",
        "Nothing here is saved.",
        "Anonymous",
        2000,
    )?;
    board.is_default = true;
    store.insert_board(board)?;
    Ok(store)
}

fn post(
    store: &dyn Store,
    matches: &ArgMatches,
    config: &Config,
    reply_to: Option<ThreadRef>,
) -> Result<()> {
    let content = match matches.get_one::<String>("content") {
        Some(content) => content.to_owned(),
        None => read_stdin()?,
    };

    let board = board_for(store, matches, config)?;
    let form = PostForm {
        author: matches.get_one::<String>("name").map(String::as_str),
        mail: matches.get_one::<String>("mail").map(String::as_str),
        content: &content,
        ip: matches.get_one::<String>("ip").unwrap(),
    };

    let poster = Poster::new(store);
    let posted = match reply_to {
        Some(thread) => poster.post_reply(&board.policy(), thread, &form)?,
        None => {
            let title = matches.get_one::<String>("title").unwrap();
            poster.post_new_thread(&board.policy(), title, &form)?
        }
    };

    println!(
        "Posted /{}/{}/{} ({}.dat){}",
        board.slug,
        posted.thread.id,
        posted.response.number,
        posted.thread.epoch_id,
        if posted.bumped { "" } else { " without bumping" }
    );

    Ok(())
}

fn print_text(thread: &Thread, responses: &[Response]) {
    println!("{} [{}.dat]", thread.title, thread.epoch_id);

    for response in responses {
        let mail = if response.mail.is_empty() {
            String::new()
        } else {
            format!(" [{}]", response.mail)
        };

        println!();
        println!(
            "{} : {}{} : {} ID:{}",
            response.number,
            response.author,
            mail,
            response.posted_at.format(TIME_FORMAT),
            response.hash_id
        );
        for line in response.content.lines() {
            println!("  {}", line);
        }
    }
}

fn print_html(thread: &Thread, responses: &[Response]) {
    let page = html! {
        article(class = "thread", id = (thread.id.to_string())) {
            h1 { : &thread.title }
            @ for response in responses {
                div(
                    class = "response",
                    id = (format!("{}-{}", thread.id, response.number))
                ) {
                    header {
                        span(class = "number") { : response.number.to_string() }
                        span(class = "author") { : response.author.name() }
                        @ if let Some(trip) = response.author.trip() {
                            span(class = "trip") { : format!("◆{}", trip) }
                        }
                        time { : response.posted_at.format(TIME_FORMAT).to_string() }
                        span(class = "hash-id") { : format!("ID:{}", response.hash_id) }
                    }
                    div(class = "body") { : response.body() }
                }
            }
        }
    };

    println!("{}", page);
}

fn show(store: &dyn Store, matches: &ArgMatches, config: &Config) -> Result<()> {
    let board = board_for(store, matches, config)?;
    let thread_ref = *matches.get_one::<ThreadRef>("thread").unwrap();
    let query = matches
        .get_one::<ResponseQuery>("query")
        .copied()
        .unwrap_or_default();

    let thread = store.thread(store.resolve_thread(board.id, thread_ref)?)?;
    let responses = store.responses(thread.id, query)?;

    debug!(
        "Showing {} response(s) of thread {} for query {:?}",
        responses.len(),
        thread.id,
        query.to_string()
    );

    match matches.get_one::<String>("format").map(String::as_str) {
        Some("html") => print_html(&thread, &responses),
        Some("json") => {
            let out = serde_json::json!({
                "thread": thread,
                "responses": responses
                    .iter()
                    .map(|r| serde_json::json!({
                        "response": r,
                        "body": r.body(),
                    }))
                    .collect::<Vec<_>>(),
            });
            serde_json::to_writer_pretty(std::io::stdout(), &out)?;
            println!();
        }
        _ => print_text(&thread, &responses),
    }

    Ok(())
}

fn main_res() -> Result<()> {
    let matches = command().get_matches();

    let (config, conf_path) = load_config(&matches)?;

    logging::init(&config)?;
    debug!("Loaded configuration:");
    config.debug_log();

    match matches.subcommand() {
        Some(("check-config", _)) => {
            // We've already loaded the config file, so we know it's good.
            match conf_path {
                Some(path) => println!("Configuration: {}", path.display()),
                None => println!("No config file; using defaults."),
            }
            println!("\nConfig is good.");
            return Ok(());
        }
        Some(("generate-config", _)) => {
            return Config::generate(std::io::stdout());
        }
        Some(("render", sub)) => {
            let thread_id = sub
                .get_one::<ThreadId>("thread-id")
                .copied()
                .unwrap_or_default();
            let nodes = render_content(thread_id, &read_stdin()?);
            serde_json::to_writer_pretty(std::io::stdout(), &nodes)?;
            println!();
            return Ok(());
        }
        _ => (),
    }

    let store: Box<dyn Store> = if matches.get_flag("memory") {
        let slug = matches
            .subcommand()
            .and_then(|(_, sub)| sub.try_get_one::<String>("board").ok())
            .flatten()
            .or(config.default_board.as_ref());
        Box::new(scratch_store(slug)?)
    } else {
        Box::new(Database::open(&config.database_url, config.pool_size)?)
    };
    let store = store.as_ref();

    match matches.subcommand() {
        Some(("add-board", sub)) => {
            let get = |key: &str| sub.get_one::<String>(key).unwrap();

            let mut board = Board::new(
                get("slug"),
                get("name"),
                get("rule"),
                get("default-name"),
                *sub.get_one::<i64>("max-length").unwrap(),
            )?;
            board.is_default = sub.get_flag("default");

            store.insert_board(board.clone())?;
            println!("Added board /{}/ ({})", board.slug, board.id);
        }
        Some(("set-default-board", sub)) => {
            let slug = sub.get_one::<String>("slug").unwrap();
            let board = store.board_by_slug(slug)?;

            store.set_default_board(board.id)?;
            println!("/{}/ is now the default board", board.slug);
        }
        Some(("boards", _)) => {
            for board in store.all_boards()? {
                println!(
                    "/{}/ {}{} (max {} chars)",
                    board.slug,
                    board.name,
                    if board.is_default { " [default]" } else { "" },
                    board.max_content_length
                );
            }
        }
        Some(("threads", sub)) => {
            let board = board_for(store, sub, &config)?;
            let page = Page {
                num: *sub.get_one::<u32>("page").unwrap(),
                width: 20,
            };

            println!(
                "/{}/ has {} thread(s)",
                board.slug,
                store.thread_count(board.id)?
            );
            for thread in store.thread_page(board.id, page)? {
                println!(
                    "{}.dat {} {} ({})",
                    thread.epoch_id,
                    thread.updated_at.format(TIME_FORMAT),
                    thread.title,
                    thread.id
                );
            }
        }
        Some(("post-thread", sub)) => post(store, sub, &config, None)?,
        Some(("post-reply", sub)) => {
            let thread = *sub.get_one::<ThreadRef>("thread").unwrap();
            post(store, sub, &config, Some(thread))?
        }
        Some(("show", sub)) => show(store, sub, &config)?,
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}

fn main() {
    if let Err(e) = main_res() {
        if e.is_storage() {
            error!("{}", e);
        }
        eprintln!("{}", e);
        std::process::exit(-1);
    }
}
