fn main() {
    pontis::run();
}
