use rocket::Route;

mod organizer;
mod public;
mod voter;

pub use organizer::Organizer;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(organizer::routes());
    routes.extend(voter::routes());
    routes.extend(public::routes());
    routes
}
