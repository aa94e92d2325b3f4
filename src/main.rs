use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use bptree_db::{Key, Tree};

/// Line-oriented command harness for exercising a `Tree` the same way an
/// external caller would: `i <key>` insert, `d <key>` delete, `p` print,
/// `f <path>` insert every key from a file (one per line), `c <path>`
/// delete every key from a file, `q` quit. Grounded on
/// `examples/original_source/btree/b_tree_test.go`'s `Test_PrintBtree`
/// transcript loop; a plain integer argument is taken as `main` with
/// `sub = 0` (`Key::from`).
fn main() -> Result<()> {
    let tree = Tree::open(Path::new("bptree-cli.db"), 32, 256)?;
    let stdin = io::stdin();
    run(&tree, stdin.lock())?;
    tree.close()?;
    Ok(())
}

fn run(tree: &Tree, input: impl BufRead) -> Result<()> {
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (cmd, arg) = match line.split_once(' ') {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };

        match cmd {
            "i" => {
                let key = parse_key(arg)?;
                if let Err(err) = tree.insert(key, key.main) {
                    eprintln!("insert {}: {err}", key.main);
                }
            }
            "d" => {
                let key = parse_key(arg)?;
                if let Err(err) = tree.delete(key) {
                    eprintln!("delete {}: {err}", key.main);
                }
            }
            "p" => {
                for (key, value) in tree.iter()? {
                    println!("{} -> {}", key.main, value);
                }
            }
            "f" => insert_from_file(tree, arg)?,
            "c" => delete_from_file(tree, arg)?,
            "q" => break,
            other => eprintln!("unrecognized command: {other}"),
        }
    }
    Ok(())
}

fn parse_key(arg: &str) -> Result<Key> {
    let main: i64 = arg
        .parse()
        .map_err(|_| anyhow!("expected an integer key, got {arg:?}"))?;
    Ok(Key::from(main))
}

fn insert_from_file(tree: &Tree, path: &str) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {path}"))?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let key = parse_key(line)?;
        if let Err(err) = tree.insert(key, key.main) {
            eprintln!("insert {}: {err}", key.main);
        }
    }
    Ok(())
}

fn delete_from_file(tree: &Tree, path: &str) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {path}"))?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let key = parse_key(line)?;
        if let Err(err) = tree.delete(key) {
            eprintln!("delete {}: {err}", key.main);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_tree() -> Tree {
        let dir = std::env::temp_dir().join("bptree-cli-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("test_{}.db", Uuid::new_v4()));
        Tree::open(&path, 4, 16).unwrap()
    }

    #[test]
    fn insert_print_delete_transcript() {
        let tree = test_tree();
        run(&tree, "i 1\ni 2\ni 3\nd 2\np\nq\n".as_bytes()).unwrap();
        let remaining: Vec<_> = tree.iter().unwrap().map(|(k, _)| k.main).collect();
        assert_eq!(remaining, vec![1, 3]);
    }

    #[test]
    fn unknown_command_does_not_abort_the_transcript() {
        let tree = test_tree();
        run(&tree, "z 9\ni 1\nq\n".as_bytes()).unwrap();
        assert_eq!(tree.search(Key::from(1)).unwrap(), Some(1));
    }
}
