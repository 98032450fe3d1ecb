use crate::finder::HandlerRegistry;

pub fn run(registry: &HandlerRegistry) {
    print!("{registry}");
}
