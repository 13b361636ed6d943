mod manager;
mod recovery;
