use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Pack an application binary into a staged firmware image
    Pack(PackOpts),
    /// Print the descriptor of a staged firmware image
    Info {
        /// The image filename
        image: PathBuf,
    },
    /// Recompute the image MAC and compare it against the descriptor
    Verify {
        /// The image filename
        image: PathBuf,
        /// File holding the 16-byte master key
        #[structopt(short = "k", long = "key")]
        key: PathBuf,
    },
}

#[derive(StructOpt, Debug)]
pub struct PackOpts {
    /// The application binary to pack
    pub input: PathBuf,
    /// The name of the file to write the staged image to
    #[structopt(default_value = "image.bin")]
    pub output: PathBuf,
    /// File holding the 16-byte master key
    #[structopt(short = "k", long = "key")]
    pub key: PathBuf,
    /// File holding the 8-byte cipher IV; zero when omitted
    #[structopt(long = "iv")]
    pub iv: Option<PathBuf>,
    /// Image timestamp; the target only accepts monotonically increasing
    /// values
    #[structopt(short = "t", long = "timestamp")]
    pub time_stamp: u32,
    /// Stage the body as plaintext instead of CFB ciphertext
    #[structopt(long = "plain")]
    pub plain: bool,
    /// File holding a 16-byte replacement master key to rotate to
    #[structopt(long = "new-key")]
    pub new_key: Option<PathBuf>,
    /// XTEA rounds for the body cipher
    #[structopt(long = "cipher-rounds", default_value = "32")]
    pub cipher_rounds: u8,
    /// XTEA rounds for the MAC
    #[structopt(long = "mac-rounds", default_value = "32")]
    pub mac_rounds: u8,
}

#[derive(StructOpt, Debug)]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,
}
