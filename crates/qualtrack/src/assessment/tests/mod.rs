mod common;
mod saga;
mod submissions;
