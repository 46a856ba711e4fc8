//! Basic usage example for `Function`.
//!
//! This example demonstrates storing closures and custom callables of one signature in the
//! same container type, copying and moving containers and recovering the concrete callable.

use opaque_fn::{Callable, Error, Function, INLINE_CAPACITY};

type Handler = Function<fn(&'static str) -> String>;

/// A callable with enough state that it does not fit into the inline slot.
#[derive(Clone)]
struct Template {
    prefix: String,
    suffix: String,
    uses: u32,
}

impl Callable<fn(&'static str) -> String> for Template {
    fn invoke(&mut self, (name,): (&'static str,)) -> String {
        self.uses = self.uses.wrapping_add(1);
        format!("{}{name}{}", self.prefix, self.suffix)
    }
}

fn main() {
    println!("Inline capacity: {INLINE_CAPACITY} bytes");
    println!();

    // A stateless closure is stored inline.
    let shout = Handler::new(|name| name.to_uppercase());
    println!("{shout:?}");
    println!("shout: {}", shout.call("world").unwrap());

    // A callable with owned strings is moved to the heap.
    let greet = Handler::from_callable(Template {
        prefix: "Hello, ".to_owned(),
        suffix: "!".to_owned(),
        uses: 0,
    });
    println!("{greet:?}");
    println!("greet: {}", greet.call("world").unwrap());

    // Copies are independent of each other.
    let mut copy = greet.clone();
    copy.target_mut::<Template>().unwrap().suffix = "?".to_owned();
    println!("copy: {}", copy.call("world").unwrap());
    println!("greet again: {}", greet.call("world").unwrap());

    let uses = greet.target::<Template>().map(|template| template.uses);
    println!("greet was used {} times", uses.unwrap_or_default());
    println!();

    // Moving out of a container leaves it empty.
    let mut original = shout;
    let moved = original.take();
    println!("moved: {}", moved.call("again").unwrap());

    match original.call("nobody") {
        Err(Error::CallableMissing) => println!("original is now empty"),
        other => println!("unexpected result: {other:?}"),
    }

    // Assigning a copy makes the empty container usable again.
    original.clone_from(&greet);
    println!("original: {}", original.call("back").unwrap());
}
